//! Worthify estimator: binary entrypoint.
//! Boots the Axum HTTP server with the estimation pipeline, call log and metrics.

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use worthify_estimator::metrics::Metrics;
use worthify_estimator::{router, AppConfig, AppState};

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - WORTHIFY_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("WORTHIFY_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("pipeline=info,marketplace=info,recognition=info,api=info,warn")
    });

    // Shuttle may already own the global subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    enable_dev_tracing();

    let cfg = AppConfig::load_default().context("loading estimator config")?;
    let state = AppState::from_config(&cfg)?;
    let metrics = Metrics::init()?;

    let app = router(state).merge(metrics.router());
    Ok(app.into())
}
