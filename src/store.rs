// src/store.rs
//! Persistence boundary for estimates and their evidence.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stats::{PriceEstimate, PricedListing};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRecord {
    pub prediction_id: u64,
    pub item_id: String,
    pub estimate: PriceEstimate,
    pub api_used: String,
    pub created_at: DateTime<Utc>,
}

/// One persisted evidence listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceComparison {
    pub prediction_id: u64,
    pub marketplace: String,
    pub listing_title: String,
    pub price: f64,
    pub listing_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceHistory {
    pub item_id: String,
    /// Newest first.
    pub predictions: Vec<PredictionRecord>,
    /// Newest first.
    pub price_history: Vec<PriceComparison>,
    pub total_listings: usize,
    pub by_platform: BTreeMap<String, Vec<PriceComparison>>,
}

#[async_trait]
pub trait EstimateStore: Send + Sync {
    /// Append a new estimate; older estimates are superseded, never edited.
    async fn save(
        &self,
        item_id: &str,
        estimate: &PriceEstimate,
        evidence: &[PricedListing],
        api_used: &str,
    ) -> anyhow::Result<u64>;

    /// `None` when nothing was ever stored for the item.
    async fn history(&self, item_id: &str) -> anyhow::Result<Option<PriceHistory>>;
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    predictions: Vec<PredictionRecord>,
    comparisons: Vec<(String, PriceComparison)>,
}

/// Bounded in-memory store. The oldest predictions (and their evidence) go first.
#[derive(Debug)]
pub struct MemoryEstimateStore {
    inner: Mutex<Inner>,
    cap: usize,
}

impl MemoryEstimateStore {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            cap: cap.clamp(1, 100_000),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for MemoryEstimateStore {
    fn default() -> Self {
        Self::with_capacity(5_000)
    }
}

#[async_trait]
impl EstimateStore for MemoryEstimateStore {
    async fn save(
        &self,
        item_id: &str,
        estimate: &PriceEstimate,
        evidence: &[PricedListing],
        api_used: &str,
    ) -> anyhow::Result<u64> {
        let now = Utc::now();
        let mut g = self.lock();
        g.next_id += 1;
        let id = g.next_id;
        g.predictions.push(PredictionRecord {
            prediction_id: id,
            item_id: item_id.to_string(),
            estimate: estimate.clone(),
            api_used: api_used.to_string(),
            created_at: now,
        });
        for l in evidence {
            g.comparisons.push((
                item_id.to_string(),
                PriceComparison {
                    prediction_id: id,
                    marketplace: l.source_name.clone(),
                    listing_title: l.title.clone(),
                    price: l.price,
                    listing_url: l.url.clone(),
                    created_at: now,
                },
            ));
        }
        if g.predictions.len() > self.cap {
            let excess = g.predictions.len() - self.cap;
            let oldest_kept = g.predictions[excess].prediction_id;
            g.predictions.drain(0..excess);
            g.comparisons.retain(|(_, c)| c.prediction_id >= oldest_kept);
        }
        tracing::debug!(target: "pipeline", prediction_id = id, evidence = evidence.len(), "estimate stored");
        Ok(id)
    }

    async fn history(&self, item_id: &str) -> anyhow::Result<Option<PriceHistory>> {
        let g = self.lock();
        let predictions: Vec<PredictionRecord> = g
            .predictions
            .iter()
            .rev()
            .filter(|p| p.item_id == item_id)
            .cloned()
            .collect();
        if predictions.is_empty() {
            return Ok(None);
        }
        let price_history: Vec<PriceComparison> = g
            .comparisons
            .iter()
            .rev()
            .filter(|(id, _)| id == item_id)
            .map(|(_, c)| c.clone())
            .collect();
        let mut by_platform: BTreeMap<String, Vec<PriceComparison>> = BTreeMap::new();
        for c in &price_history {
            by_platform
                .entry(c.marketplace.clone())
                .or_default()
                .push(c.clone());
        }
        Ok(Some(PriceHistory {
            item_id: item_id.to_string(),
            total_listings: price_history.len(),
            predictions,
            price_history,
            by_platform,
        }))
    }
}
