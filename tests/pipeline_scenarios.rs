// tests/pipeline_scenarios.rs
//
// End-to-end pipeline runs against scripted recognition and fixture sources.

use std::sync::Arc;
use std::time::Duration;

use worthify_estimator::call_log::CallLogger;
use worthify_estimator::marketplace::providers::{FixtureListing, FixtureSource};
use worthify_estimator::marketplace::{MarketplaceFetcher, MarketplaceSource, SourceOutcome};
use worthify_estimator::ranking::{TIER_MARKETPLACE, TIER_VISUAL, VISUAL_MATCH_SOURCE};
use worthify_estimator::recognition::{
    ConfidenceTier, ImageRef, MockRecognizer, RecognitionResult, RecognitionSource, ScoredText,
    VisualMatch,
};
use worthify_estimator::{AnalysisRequest, Pipeline, PipelineError, PipelineSettings};

fn provider_result(labels: &[(&str, f32)], visual: Vec<VisualMatch>) -> RecognitionResult {
    RecognitionResult {
        best_guess_title: labels.first().map(|l| l.0.to_string()).unwrap_or_default(),
        best_guess_labels: Vec::new(),
        labels: labels.iter().map(|(d, s)| ScoredText::new(*d, *s)).collect(),
        web_entities: Vec::new(),
        visual_matches: visual,
        confidence_tier: ConfidenceTier::Low,
        source: RecognitionSource::Provider,
    }
}

fn fixture(name: &str, prices: &[f64]) -> FixtureSource {
    FixtureSource::new(
        name,
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| FixtureListing::new(&format!("{name} {{keywords}} #{i}"), *p, "https://m.example"))
            .collect(),
    )
}

fn pipeline(recognizer: MockRecognizer, sources: Vec<Arc<dyn MarketplaceSource>>) -> Pipeline {
    let fetcher = MarketplaceFetcher::new(sources, Duration::from_secs(2), CallLogger::disabled());
    Pipeline::new(
        Arc::new(recognizer),
        fetcher,
        PipelineSettings::default(),
        CallLogger::disabled(),
    )
}

fn watch_request() -> AnalysisRequest {
    AnalysisRequest {
        item_name: "Grandpa's watch".into(),
        category: "Watches".into(),
        image: Some(ImageRef::parse("https://cdn.example/watch.jpg")),
        keywords: None,
    }
}

#[tokio::test(start_paused = true)]
async fn pocket_watch_with_one_source_timing_out() {
    let p = pipeline(
        MockRecognizer::returning(provider_result(&[("pocket watch", 0.9)], Vec::new())),
        vec![
            Arc::new(fixture("A", &[100.0, 200.0])),
            Arc::new(fixture("B", &[999.0]).delayed(Duration::from_secs(30))),
        ],
    );

    let out = p.analyze(&watch_request()).await.expect("pipeline succeeds");

    assert_eq!(out.keywords_used, "pocket watch");
    assert!(out.image_analysis_used);
    assert_eq!(out.ranked_results.groups.len(), 1);
    let only = &out.ranked_results.groups[0];
    assert_eq!(only.tier, TIER_MARKETPLACE);
    assert_eq!(only.source_name, "A");
    assert_eq!(only.listings.len(), 2);

    assert_eq!(out.estimate.average_price, 150.0);
    assert_eq!(out.estimate.min_price, 100.0);
    assert_eq!(out.estimate.max_price, 200.0);
    assert_eq!(out.estimate.listing_count, 2);

    assert_eq!(out.source_reports[1].source_name, "B");
    assert_eq!(
        out.source_reports[1].outcome,
        SourceOutcome::Failed("timeout".to_string())
    );
}

#[tokio::test]
async fn no_signal_and_empty_source_yields_zero_estimate() {
    let p = pipeline(MockRecognizer::unavailable(), vec![Arc::new(fixture("Etsy", &[]))]);
    let out = p.analyze(&watch_request()).await.expect("no error raised");

    assert!(out.ranked_results.is_empty());
    assert_eq!(out.estimate.listing_count, 0);
    assert_eq!(out.estimate.average_price, 0.0);
    assert_eq!(out.estimate.min_price, 0.0);
    assert_eq!(out.estimate.max_price, 0.0);
    assert_eq!(out.source_reports[0].outcome, SourceOutcome::Empty);
}

#[tokio::test]
async fn image_keywords_never_contain_item_metadata() {
    let p = pipeline(
        MockRecognizer::returning(provider_result(
            &[("Brass", 0.95), ("Compass", 0.9), ("Navigation", 0.7)],
            Vec::new(),
        )),
        vec![Arc::new(fixture("A", &[10.0]))],
    );
    let out = p.analyze(&watch_request()).await.unwrap();
    let kw = out.keywords_used;
    assert_eq!(kw, "brass compass navigation");
    for forbidden in ["grandpa", "watches", "watch"] {
        assert!(!kw.split(' ').any(|t| t == forbidden), "{forbidden} leaked into {kw}");
    }
}

#[tokio::test]
async fn fallback_keywords_come_from_metadata_only() {
    let p = pipeline(MockRecognizer::unavailable(), vec![Arc::new(fixture("A", &[10.0]))]);
    let out = p.analyze(&watch_request()).await.unwrap();

    assert_eq!(out.recognition_metadata.source, RecognitionSource::Fallback);
    assert!(out.ranked_results.visual_matches().is_none());
    assert!(!out.image_analysis_used);
    let tokens: Vec<&str> = out.keywords_used.split(' ').collect();
    assert!(tokens.len() <= 10);
    assert_eq!(tokens, vec!["vintage", "watch", "antique", "timepiece", "grandpa's"]);
}

#[tokio::test]
async fn visual_matches_lead_and_do_not_affect_statistics() {
    let visual = vec![
        VisualMatch {
            url: "https://shop.example/pw".into(),
            title: Some("Antique pocket watch".into()),
            score: 0.97,
        },
        VisualMatch {
            url: "https://img.example/similar.jpg".into(),
            title: None,
            score: 0.8,
        },
    ];
    let p = pipeline(
        MockRecognizer::returning(provider_result(&[("pocket watch", 0.9)], visual)),
        vec![
            Arc::new(fixture("A", &[40.0]).delayed(Duration::from_millis(30))),
            Arc::new(fixture("B", &[60.0])),
        ],
    );
    let out = p.analyze(&watch_request()).await.unwrap();

    let groups = &out.ranked_results.groups;
    assert_eq!(groups[0].tier, TIER_VISUAL);
    assert_eq!(groups[0].source_name, VISUAL_MATCH_SOURCE);
    assert_eq!(groups[0].listings.len(), 1);
    assert_eq!(groups[1].source_name, "A");
    assert_eq!(groups[2].source_name, "B");
    assert_eq!(out.estimate.listing_count, 2);
    assert_eq!(out.estimate.average_price, 50.0);
    assert_eq!(out.evidence.len(), 2);
}

#[tokio::test]
async fn empty_request_is_rejected() {
    let p = pipeline(MockRecognizer::unavailable(), vec![Arc::new(fixture("A", &[10.0]))]);
    let err = p
        .analyze(&AnalysisRequest {
            image: Some(ImageRef::Bytes(vec![0xff, 0xd8])),
            ..AnalysisRequest::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
}
