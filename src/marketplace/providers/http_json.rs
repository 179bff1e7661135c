// src/marketplace/providers/http_json.rs
//! Keyword search against a JSON marketplace endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SourceError;
use crate::marketplace::{normalize_title, MarketplaceListing, MarketplaceSource, SourceResponse};

/// Response shape the endpoint speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// `{ "listings": [ { "title", "price", "url" } ] }`
    #[default]
    Listings,
    /// `{ "itemSummaries": [ { "title", "price": { "value" }, "itemWebUrl" } ] }`
    EbayBrowse,
}

pub struct HttpJsonSource {
    name: String,
    endpoint: String,
    format: WireFormat,
    api_key: Option<String>,
    limit: usize,
    /// Public search page (with `{keywords}`) used when a listing has no URL.
    search_url: Option<String>,
    http: reqwest::Client,
}

impl HttpJsonSource {
    pub fn new(
        name: &str,
        endpoint: &str,
        format: WireFormat,
        api_key: Option<String>,
        limit: usize,
        search_url: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("worthify-estimator/0.1")
            .connect_timeout(Duration::from_secs(3))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            format,
            api_key,
            limit: limit.max(1),
            search_url,
            http,
        })
    }

    fn fallback_url(&self, keywords: &str) -> String {
        match &self.search_url {
            Some(tpl) => tpl.replace("{keywords}", &urlencoding::encode(keywords)),
            None => self.request_url(keywords),
        }
    }
}

#[async_trait]
impl MarketplaceSource for HttpJsonSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn request_url(&self, keywords: &str) -> String {
        let sep = if self.endpoint.contains('?') { '&' } else { '?' };
        format!(
            "{}{sep}q={}&limit={}",
            self.endpoint,
            urlencoding::encode(keywords),
            self.limit
        )
    }

    async fn search(&self, keywords: &str) -> Result<SourceResponse, SourceError> {
        if self.format == WireFormat::EbayBrowse && self.api_key.is_none() {
            return Err(SourceError::Auth(format!("{}: no api key configured", self.name)));
        }

        let mut req = self.http.get(self.request_url(keywords));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        if self.format == WireFormat::EbayBrowse {
            req = req.header("X-EBAY-C-MARKETPLACE-ID", "EBAY_US");
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        let listings = parse_body(
            &self.name,
            &body,
            self.format,
            self.limit,
            &self.fallback_url(keywords),
        )?;
        Ok(SourceResponse {
            status: status.as_u16(),
            listings,
        })
    }
}

/// Parse a response body into listings, enforcing the listing contract.
pub fn parse_body(
    source_name: &str,
    body: &str,
    format: WireFormat,
    limit: usize,
    fallback_url: &str,
) -> Result<Vec<MarketplaceListing>, SourceError> {
    let root: Value =
        serde_json::from_str(body).map_err(|e| SourceError::Malformed(e.to_string()))?;
    let (items_key, url_key) = match format {
        WireFormat::Listings => ("listings", "url"),
        WireFormat::EbayBrowse => ("itemSummaries", "itemWebUrl"),
    };

    let items = match root.get(items_key) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(a)) => a,
        Some(_) => {
            return Err(SourceError::Malformed(format!(
                "`{items_key}` is not an array"
            )))
        }
    };

    let mut out = Vec::with_capacity(items.len().min(limit));
    for (i, item) in items.iter().take(limit).enumerate() {
        let title = item
            .get("title")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::Malformed(format!("item {i}: missing title")))?;
        let raw_price = match format {
            WireFormat::Listings => item.get("price"),
            WireFormat::EbayBrowse => item.get("price").and_then(|p| p.get("value")),
        };
        let price = parse_price(raw_price)
            .map_err(|why| SourceError::Malformed(format!("item {i}: {why}")))?;
        let url = match item.get(url_key).and_then(Value::as_str) {
            Some(u) if !u.is_empty() => u.to_string(),
            _ if format == WireFormat::EbayBrowse => fallback_url.to_string(),
            _ => return Err(SourceError::Malformed(format!("item {i}: missing url"))),
        };
        out.push(MarketplaceListing {
            source_name: source_name.to_string(),
            title: normalize_title(title),
            price,
            url,
        });
    }
    Ok(out)
}

/// Absent → 0. Numbers and numeric strings must be finite and non-negative.
fn parse_price(v: Option<&Value>) -> Result<f64, String> {
    let p = match v {
        None | Some(Value::Null) => return Ok(0.0),
        Some(Value::Number(n)) => n.as_f64().ok_or("price out of range")?,
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("price `{s}` is not a number"))?,
        Some(other) => return Err(format!("price has unexpected type: {other}")),
    };
    if !p.is_finite() || p < 0.0 {
        return Err(format!("price {p} is negative or not finite"));
    }
    Ok(p)
}
