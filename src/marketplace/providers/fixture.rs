// src/marketplace/providers/fixture.rs
//! Canned marketplace source for local runs and tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::marketplace::{normalize_title, MarketplaceListing, MarketplaceSource, SourceResponse};

/// One canned listing. `{keywords}` in title or url is replaced by the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureListing {
    pub title: String,
    pub price: f64,
    #[serde(default)]
    pub url: String,
}

impl FixtureListing {
    pub fn new(title: &str, price: f64, url: &str) -> Self {
        Self {
            title: title.to_string(),
            price,
            url: url.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Behavior {
    Respond,
    Fail(u16),
    Delay(Duration),
    Malformed,
}

#[derive(Debug, Clone)]
pub struct FixtureSource {
    name: String,
    listings: Vec<FixtureListing>,
    behavior: Behavior,
}

impl FixtureSource {
    pub fn new(name: &str, listings: Vec<FixtureListing>) -> Self {
        Self {
            name: name.to_string(),
            listings,
            behavior: Behavior::Respond,
        }
    }

    /// Source that always answers with the given HTTP status.
    pub fn failing(name: &str, status: u16) -> Self {
        Self {
            behavior: Behavior::Fail(status),
            ..Self::new(name, Vec::new())
        }
    }

    /// Source that always answers with a body violating the listing contract.
    pub fn malformed(name: &str) -> Self {
        Self {
            behavior: Behavior::Malformed,
            ..Self::new(name, Vec::new())
        }
    }

    /// Answer only after `delay` (used to exercise timeouts and ordering).
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.behavior = Behavior::Delay(delay);
        self
    }
}

#[async_trait]
impl MarketplaceSource for FixtureSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn request_url(&self, keywords: &str) -> String {
        format!(
            "fixture://{}?q={}",
            self.name.to_ascii_lowercase(),
            urlencoding::encode(keywords)
        )
    }

    async fn search(&self, keywords: &str) -> Result<SourceResponse, SourceError> {
        match &self.behavior {
            Behavior::Respond => {}
            Behavior::Delay(d) => tokio::time::sleep(*d).await,
            Behavior::Fail(status) => return Err(SourceError::Status(*status)),
            Behavior::Malformed => {
                return Err(SourceError::Malformed("fixture returned garbage".to_string()))
            }
        }
        let encoded = urlencoding::encode(keywords);
        let listings = self
            .listings
            .iter()
            .map(|l| MarketplaceListing {
                source_name: self.name.clone(),
                title: normalize_title(&l.title.replace("{keywords}", keywords)),
                price: l.price.max(0.0),
                url: l.url.replace("{keywords}", &encoded),
            })
            .collect();
        Ok(SourceResponse {
            status: 200,
            listings,
        })
    }
}
