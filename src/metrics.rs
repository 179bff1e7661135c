use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the process-wide Prometheus recorder. Later calls reuse it.
    pub fn init() -> anyhow::Result<Self> {
        let handle = HANDLE.get_or_try_init(|| {
            // Use default buckets to avoid API differences across crate versions.
            PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))
        })?;
        Ok(Self {
            handle: handle.clone(),
        })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
