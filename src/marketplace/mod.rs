// src/marketplace/mod.rs
//! Concurrent multi-source marketplace lookup.
//!
//! One task per configured source. Each task writes into its own slot, indexed
//! by configuration order, so the output order never depends on which source
//! answers first. A failing source yields an empty slot and never aborts its
//! siblings.

pub mod providers;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use once_cell::sync::OnceCell;
use regex::Regex;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::call_log::CallLogger;
use crate::error::SourceError;

pub use types::{
    MarketplaceListing, MarketplaceSource, MarketplaceSourceResult, SourceOutcome, SourceReport,
    SourceResponse,
};

/// Full fetch result: non-empty sources in configured order plus one report per source.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub results: Vec<MarketplaceSourceResult>,
    pub reports: Vec<SourceReport>,
}

pub struct MarketplaceFetcher {
    sources: Vec<Arc<dyn MarketplaceSource>>,
    per_source_timeout: Duration,
    logger: CallLogger,
}

type Slot = Option<(Result<SourceResponse, SourceError>, Duration)>;

impl MarketplaceFetcher {
    pub fn new(
        sources: Vec<Arc<dyn MarketplaceSource>>,
        per_source_timeout: Duration,
        logger: CallLogger,
    ) -> Self {
        Self {
            sources,
            per_source_timeout,
            logger,
        }
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Non-empty sources, in configured order.
    pub async fn fetch(&self, keywords: &str) -> Vec<MarketplaceSourceResult> {
        self.fetch_detailed(keywords, None).await.results
    }

    /// Like [`fetch`](Self::fetch), but also reports attempted-but-empty and failed
    /// sources. `deadline` further bounds every source's time budget.
    pub async fn fetch_detailed(&self, keywords: &str, deadline: Option<Instant>) -> FetchReport {
        let t0 = Instant::now();
        let budget = match deadline {
            Some(d) => self
                .per_source_timeout
                .min(d.saturating_duration_since(t0)),
            None => self.per_source_timeout,
        };

        let mut set = JoinSet::new();
        for (idx, source) in self.sources.iter().enumerate() {
            let source = Arc::clone(source);
            let keywords = keywords.to_string();
            set.spawn(async move {
                let started = Instant::now();
                let res = match tokio::time::timeout(budget, source.search(&keywords)).await {
                    Ok(r) => r,
                    Err(_) => Err(SourceError::Timeout(budget.as_millis() as u64)),
                };
                (idx, res, started.elapsed())
            });
        }

        let mut slots: Vec<Slot> = (0..self.sources.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, res, elapsed)) => slots[idx] = Some((res, elapsed)),
                Err(e) => tracing::warn!(target: "marketplace", error = %e, "marketplace task failed"),
            }
        }

        let mut report = FetchReport::default();
        for (source, slot) in self.sources.iter().zip(slots) {
            let name = source.name();
            let url = source.request_url(keywords);
            let (outcome, elapsed) = match slot {
                Some((Ok(resp), elapsed)) => {
                    self.logger.record(name, &url, &resp.status.to_string());
                    counter!("marketplace_listings_total").increment(resp.listings.len() as u64);
                    let n = resp.listings.len();
                    let outcome = if n == 0 {
                        SourceOutcome::Empty
                    } else {
                        report.results.push(MarketplaceSourceResult {
                            source_name: name.to_string(),
                            listings: resp.listings,
                        });
                        SourceOutcome::Listings(n)
                    };
                    (outcome, elapsed)
                }
                Some((Err(e), elapsed)) => {
                    let label = e.status_label();
                    self.logger.record(name, &url, &label);
                    counter!("marketplace_source_errors_total").increment(1);
                    tracing::warn!(target: "marketplace", source = name, error = %e, "marketplace source failed");
                    (SourceOutcome::Failed(label), elapsed)
                }
                None => {
                    self.logger.record(name, &url, "error");
                    counter!("marketplace_source_errors_total").increment(1);
                    (SourceOutcome::Failed("error".to_string()), Duration::ZERO)
                }
            };
            report.reports.push(SourceReport {
                source_name: name.to_string(),
                outcome,
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }

        histogram!("marketplace_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        tracing::info!(
            target: "marketplace",
            sources = self.sources.len(),
            non_empty = report.results.len(),
            "marketplace fetch finished"
        );
        report
    }
}

/// Normalize a listing title: decode HTML entities, strip tags, collapse whitespace.
pub fn normalize_title(s: &str) -> String {
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[a-z][^>]*>").expect("tag regex"));
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));

    let decoded = html_escape::decode_html_entities(s);
    let stripped = re_tags.replace_all(&decoded, " ");
    let collapsed = re_ws.replace_all(&stripped, " ");
    let mut out = collapsed.trim().to_string();
    if out.chars().count() > 300 {
        out = out.chars().take(300).collect();
    }
    out
}
