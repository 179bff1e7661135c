// src/marketplace/types.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// One priced listing returned by a marketplace source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceListing {
    pub source_name: String,
    pub title: String,
    /// USD, always `>= 0`. Zero means the source gave no price.
    pub price: f64,
    pub url: String,
}

/// Listings of one source, in the source's native order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceSourceResult {
    pub source_name: String,
    pub listings: Vec<MarketplaceListing>,
}

/// Successful source answer: HTTP status (for the call log) plus parsed listings.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceResponse {
    pub status: u16,
    pub listings: Vec<MarketplaceListing>,
}

/// What happened to one configured source during a fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum SourceOutcome {
    Listings(usize),
    Empty,
    /// Call-log status label of the failure (`"503"`, `"timeout"`, `"error"`).
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub source_name: String,
    pub outcome: SourceOutcome,
    pub elapsed_ms: u64,
}

/// A marketplace data source queried by keyword.
#[async_trait]
pub trait MarketplaceSource: Send + Sync {
    /// Display name; also the provider name in the call log.
    fn name(&self) -> &str;

    /// URL recorded in the call log for this query.
    fn request_url(&self, keywords: &str) -> String;

    async fn search(&self, keywords: &str) -> Result<SourceResponse, SourceError>;
}
