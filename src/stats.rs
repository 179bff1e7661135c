// src/stats.rs
use serde::{Deserialize, Serialize};

use crate::ranking::RankedResultSet;

pub const CURRENCY: &str = "USD";

/// Summary of priced marketplace evidence. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceEstimate {
    pub average_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub listing_count: usize,
    pub currency: String,
}

impl PriceEstimate {
    /// "No pricing evidence" outcome.
    pub fn zero() -> Self {
        Self {
            average_price: 0.0,
            min_price: 0.0,
            max_price: 0.0,
            listing_count: 0,
            currency: CURRENCY.to_string(),
        }
    }

    pub fn has_evidence(&self) -> bool {
        self.listing_count > 0
    }

    /// `"$min - $max"` with two decimals.
    pub fn price_range(&self) -> String {
        format!("${:.2} - ${:.2}", self.min_price, self.max_price)
    }
}

/// A priced marketplace listing kept as evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedListing {
    pub source_name: String,
    pub title: String,
    pub price: f64,
    pub url: String,
}

/// Marketplace listings with `price > 0`, tiers in order. Visual matches never count.
pub fn priced_listings(set: &RankedResultSet) -> Vec<PricedListing> {
    set.listings()
        .filter(|(g, l)| !g.is_visual_match && !l.is_visual_match)
        .filter_map(|(g, l)| {
            let price = l.price.filter(|p| p.is_finite() && *p > 0.0)?;
            Some(PricedListing {
                source_name: g.source_name.clone(),
                title: l.title.clone(),
                price,
                url: l.url.clone(),
            })
        })
        .collect()
}

pub fn summarize(set: &RankedResultSet) -> PriceEstimate {
    summarize_prices(priced_listings(set).iter().map(|l| l.price))
}

pub fn summarize_prices<I: IntoIterator<Item = f64>>(prices: I) -> PriceEstimate {
    let mut n = 0usize;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for p in prices.into_iter().filter(|p| p.is_finite() && *p > 0.0) {
        n += 1;
        sum += p;
        min = min.min(p);
        max = max.max(p);
    }
    if n == 0 {
        return PriceEstimate::zero();
    }
    PriceEstimate {
        average_price: sum / n as f64,
        min_price: min,
        max_price: max,
        listing_count: n,
        currency: CURRENCY.to_string(),
    }
}

/// First `limit` priced listings, the bounded set handed to persistence.
pub fn evidence(set: &RankedResultSet, limit: usize) -> Vec<PricedListing> {
    let mut out = priced_listings(set);
    out.truncate(limit);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::{MarketplaceListing, MarketplaceSourceResult};
    use crate::ranking::rank;
    use crate::recognition::VisualMatch;

    fn source(name: &str, prices: &[f64]) -> MarketplaceSourceResult {
        MarketplaceSourceResult {
            source_name: name.into(),
            listings: prices
                .iter()
                .map(|p| MarketplaceListing {
                    source_name: name.into(),
                    title: format!("{name} {p}"),
                    price: *p,
                    url: "https://m.example".into(),
                })
                .collect(),
        }
    }

    #[test]
    fn basic_mean_min_max() {
        let e = summarize_prices([10.0, 20.0, 30.0]);
        assert_eq!(e.average_price, 20.0);
        assert_eq!(e.min_price, 10.0);
        assert_eq!(e.max_price, 30.0);
        assert_eq!(e.listing_count, 3);
        assert_eq!(e.price_range(), "$10.00 - $30.00");
    }

    #[test]
    fn empty_is_zero_not_error() {
        let e = summarize(&RankedResultSet::default());
        assert_eq!(e, PriceEstimate::zero());
        assert_eq!(e.currency, "USD");
        assert!(!e.has_evidence());
    }

    #[test]
    fn zero_prices_and_visual_matches_do_not_count() {
        let visual = vec![VisualMatch {
            url: "https://v.example".into(),
            title: Some("look-alike".into()),
            score: 0.9,
        }];
        let set = rank(&visual, &[source("eBay", &[0.0, 40.0]), source("Etsy", &[60.0])], 15);
        let e = summarize(&set);
        assert_eq!(e.listing_count, 2);
        assert_eq!(e.average_price, 50.0);
        assert_eq!(e.min_price, 40.0);
    }

    #[test]
    fn evidence_is_bounded_and_ordered() {
        let prices: Vec<f64> = (1..=30).map(f64::from).collect();
        let set = rank(&[], &[source("eBay", &prices)], 15);
        let ev = evidence(&set, 20);
        assert_eq!(ev.len(), 20);
        assert_eq!(ev[0].price, 1.0);
        assert_eq!(ev[19].price, 20.0);
    }
}
