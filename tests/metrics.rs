// tests/metrics.rs
use std::sync::Arc;
use std::time::Duration;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use worthify_estimator::call_log::CallLogger;
use worthify_estimator::marketplace::providers::{FixtureListing, FixtureSource};
use worthify_estimator::marketplace::{MarketplaceFetcher, MarketplaceSource};
use worthify_estimator::metrics::Metrics;
use worthify_estimator::recognition::{ImageRef, MockRecognizer};
use worthify_estimator::{AnalysisRequest, Pipeline, PipelineSettings};

#[tokio::test]
async fn metrics_endpoint_contains_expected_series() {
    let metrics = Metrics::init().expect("install recorder");
    // A second init reuses the installed recorder.
    Metrics::init().expect("re-init");

    let sources: Vec<Arc<dyn MarketplaceSource>> = vec![
        Arc::new(FixtureSource::new(
            "Etsy",
            vec![FixtureListing::new("{keywords}", 12.0, "https://etsy.example")],
        )),
        Arc::new(FixtureSource::failing("eBay", 500)),
    ];
    let pipeline = Pipeline::new(
        Arc::new(MockRecognizer::unavailable()),
        MarketplaceFetcher::new(sources, Duration::from_secs(1), CallLogger::disabled()),
        PipelineSettings::default(),
        CallLogger::disabled(),
    );
    pipeline
        .analyze(&AnalysisRequest {
            item_name: "Oak chair".into(),
            category: "Furniture".into(),
            image: Some(ImageRef::parse("uploads/chair.jpg")),
            keywords: None,
        })
        .await
        .expect("analysis");

    let app: Router = metrics.router();
    let resp = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap(); // 1 MiB
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "pipeline_runs_total",
        "marketplace_source_errors_total",
        "marketplace_listings_total",
        "marketplace_fetch_ms",
    ] {
        assert!(text.contains(needle), "missing series {needle} in:\n{text}");
    }
}
