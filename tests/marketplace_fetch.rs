// tests/marketplace_fetch.rs
//
// Fan-out ordering, failure isolation and call logging of the fetcher.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use worthify_estimator::call_log::{CallLogFilter, CallLogger, MemoryLogSink};
use worthify_estimator::error::SourceError;
use worthify_estimator::marketplace::providers::{FixtureListing, FixtureSource};
use worthify_estimator::marketplace::{
    MarketplaceFetcher, MarketplaceSource, SourceOutcome, SourceResponse,
};

fn source(name: &str, price: f64) -> FixtureSource {
    FixtureSource::new(
        name,
        vec![FixtureListing::new(
            "{keywords} listing",
            price,
            "https://m.example/?q={keywords}",
        )],
    )
}

/// Source whose search task panics instead of returning.
struct PanickingSource;

#[async_trait]
impl MarketplaceSource for PanickingSource {
    fn name(&self) -> &str {
        "Chairish"
    }

    fn request_url(&self, keywords: &str) -> String {
        format!("https://chairish.example/search?q={}", urlencoding::encode(keywords))
    }

    async fn search(&self, _keywords: &str) -> Result<SourceResponse, SourceError> {
        panic!("listing parser blew up");
    }
}

#[tokio::test(start_paused = true)]
async fn output_follows_configuration_not_completion_order() {
    let sources: Vec<Arc<dyn MarketplaceSource>> = vec![
        Arc::new(source("eBay", 10.0).delayed(Duration::from_millis(900))),
        Arc::new(source("Etsy", 20.0).delayed(Duration::from_millis(500))),
        Arc::new(source("Amazon", 30.0)),
    ];
    let fetcher = MarketplaceFetcher::new(sources, Duration::from_secs(2), CallLogger::disabled());

    let out = fetcher.fetch("brass compass").await;
    let names: Vec<&str> = out.iter().map(|r| r.source_name.as_str()).collect();
    assert_eq!(names, vec!["eBay", "Etsy", "Amazon"]);
    assert_eq!(out[0].listings[0].title, "brass compass listing");
}

#[tokio::test(start_paused = true)]
async fn failures_are_isolated_and_omitted() {
    let sources: Vec<Arc<dyn MarketplaceSource>> = vec![
        Arc::new(FixtureSource::failing("eBay", 503)),
        Arc::new(source("Etsy", 20.0)),
        Arc::new(FixtureSource::malformed("Ruby Lane")),
        Arc::new(source("Amazon", 30.0).delayed(Duration::from_secs(10))),
        Arc::new(FixtureSource::new("Chairish", Vec::new())),
    ];
    let fetcher = MarketplaceFetcher::new(sources, Duration::from_secs(1), CallLogger::disabled());

    let report = fetcher.fetch_detailed("clock", None).await;
    let names: Vec<&str> = report.results.iter().map(|r| r.source_name.as_str()).collect();
    assert_eq!(names, vec!["Etsy"]);

    let outcomes: Vec<SourceOutcome> = report.reports.iter().map(|r| r.outcome.clone()).collect();
    assert_eq!(
        outcomes,
        vec![
            SourceOutcome::Failed("503".into()),
            SourceOutcome::Listings(1),
            SourceOutcome::Failed("error".into()),
            SourceOutcome::Failed("timeout".into()),
            SourceOutcome::Empty,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn deadline_shrinks_every_source_budget() {
    let sources: Vec<Arc<dyn MarketplaceSource>> = vec![
        Arc::new(source("eBay", 10.0).delayed(Duration::from_millis(300))),
        Arc::new(source("Etsy", 20.0)),
    ];
    let fetcher = MarketplaceFetcher::new(sources, Duration::from_secs(5), CallLogger::disabled());

    let deadline = tokio::time::Instant::now() + Duration::from_millis(100);
    let report = fetcher.fetch_detailed("lamp", Some(deadline)).await;
    assert_eq!(report.reports[0].outcome, SourceOutcome::Failed("timeout".into()));
    assert_eq!(report.reports[1].outcome, SourceOutcome::Listings(1));
}

#[tokio::test]
async fn every_attempt_is_logged_with_its_status() {
    let sink = Arc::new(MemoryLogSink::with_capacity(100));
    let (logger, drain) = CallLogger::spawn(sink.clone(), 16);
    let sources: Vec<Arc<dyn MarketplaceSource>> = vec![
        Arc::new(source("Etsy", 20.0)),
        Arc::new(FixtureSource::failing("eBay", 401)),
    ];
    let fetcher = MarketplaceFetcher::new(sources, Duration::from_secs(1), logger.clone());

    let out = fetcher.fetch("vase").await;
    assert_eq!(out.len(), 1);

    // Closing every sender lets the drain task finish.
    drop(fetcher);
    drop(logger);
    drain.await.expect("drain task");

    let logs = sink.query(&CallLogFilter::default());
    assert_eq!(logs.len(), 2);
    let ebay = sink.query(&CallLogFilter {
        provider_name: Some("eBay".into()),
        ..CallLogFilter::default()
    });
    assert_eq!(ebay[0].status_label, "401");
    assert!(ebay[0].request_url.contains("q=vase"));

    let stats = sink.stats();
    let etsy = stats.iter().find(|s| s.provider_name == "Etsy").unwrap();
    assert_eq!(etsy.successful_calls, 1);
    let ebay = stats.iter().find(|s| s.provider_name == "eBay").unwrap();
    assert_eq!(ebay.failed_calls, 1);
}

#[tokio::test]
async fn panicking_source_is_isolated_and_logged() {
    let sink = Arc::new(MemoryLogSink::with_capacity(100));
    let (logger, drain) = CallLogger::spawn(sink.clone(), 16);
    let sources: Vec<Arc<dyn MarketplaceSource>> = vec![
        Arc::new(source("eBay", 10.0)),
        Arc::new(PanickingSource),
        Arc::new(source("Etsy", 20.0)),
    ];
    let fetcher = MarketplaceFetcher::new(sources, Duration::from_secs(1), logger.clone());

    let report = fetcher.fetch_detailed("oak chair", None).await;
    let names: Vec<&str> = report.results.iter().map(|r| r.source_name.as_str()).collect();
    assert_eq!(names, vec!["eBay", "Etsy"]);

    let outcomes: Vec<SourceOutcome> = report.reports.iter().map(|r| r.outcome.clone()).collect();
    assert_eq!(
        outcomes,
        vec![
            SourceOutcome::Listings(1),
            SourceOutcome::Failed("error".into()),
            SourceOutcome::Listings(1),
        ]
    );

    drop(fetcher);
    drop(logger);
    drain.await.expect("drain task");

    let chairish = sink.query(&CallLogFilter {
        provider_name: Some("Chairish".into()),
        ..CallLogFilter::default()
    });
    assert_eq!(chairish.len(), 1);
    assert_eq!(chairish[0].status_label, "error");
    assert!(chairish[0].request_url.contains("q=oak%20chair"));
}
