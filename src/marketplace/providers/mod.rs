// src/marketplace/providers/mod.rs
pub mod fixture;
pub mod http_json;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::config::{MarketplaceConfig, SourceKind};
use crate::marketplace::MarketplaceSource;

pub use fixture::{FixtureListing, FixtureSource};
pub use http_json::{HttpJsonSource, WireFormat};

/// Build the configured sources, preserving configuration order.
pub fn build_sources(cfg: &MarketplaceConfig) -> Result<Vec<Arc<dyn MarketplaceSource>>> {
    let timeout = Duration::from_millis(cfg.timeout_ms.max(1));
    let mut out: Vec<Arc<dyn MarketplaceSource>> = Vec::with_capacity(cfg.sources.len());
    for s in &cfg.sources {
        let source: Arc<dyn MarketplaceSource> = match s.kind {
            SourceKind::Fixture => Arc::new(FixtureSource::new(&s.name, s.listings.clone())),
            SourceKind::Http => {
                let endpoint = s
                    .endpoint
                    .as_deref()
                    .ok_or_else(|| anyhow!("source `{}`: http source needs an endpoint", s.name))?;
                Arc::new(HttpJsonSource::new(
                    &s.name,
                    endpoint,
                    s.format,
                    s.resolved_api_key(),
                    s.limit,
                    s.search_url.clone(),
                    timeout,
                )?)
            }
        };
        out.push(source);
    }
    Ok(out)
}
