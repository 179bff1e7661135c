// src/ranking.rs
//! Tiered merge of visual matches and marketplace listings.
//!
//! Tier 1 holds image-similarity candidates and always comes first. Each
//! marketplace source becomes its own tier-2 group, in fetch order.

use serde::{Deserialize, Serialize};

use crate::marketplace::MarketplaceSourceResult;
use crate::recognition::VisualMatch;

/// Pseudo-source name of the tier-1 group.
pub const VISUAL_MATCH_SOURCE: &str = "Visual Matches from Image Analysis";
pub const TIER_VISUAL: u8 = 1;
pub const TIER_MARKETPLACE: u8 = 2;
pub const DEFAULT_VISUAL_MATCH_CAP: usize = 15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedListing {
    pub title: String,
    /// `None` for visual matches: price is unknown at discovery time.
    pub price: Option<f64>,
    pub url: String,
    pub is_visual_match: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_score: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedGroup {
    pub tier: u8,
    pub is_visual_match: bool,
    pub source_name: String,
    pub listings: Vec<RankedListing>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RankedResultSet {
    pub groups: Vec<RankedGroup>,
}

impl RankedResultSet {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn visual_matches(&self) -> Option<&RankedGroup> {
        self.groups.iter().find(|g| g.is_visual_match)
    }

    pub fn visual_match_count(&self) -> usize {
        self.visual_matches().map_or(0, |g| g.listings.len())
    }

    /// Tier-2+ groups, in order.
    pub fn marketplace_groups(&self) -> impl Iterator<Item = &RankedGroup> {
        self.groups.iter().filter(|g| !g.is_visual_match)
    }

    /// Every listing, tiers in order.
    pub fn listings(&self) -> impl Iterator<Item = (&RankedGroup, &RankedListing)> {
        self.groups
            .iter()
            .flat_map(|g| g.listings.iter().map(move |l| (g, l)))
    }
}

/// Merge visual matches and marketplace results into a tiered set.
///
/// Visual matches lacking a url or title are dropped, the rest capped at `cap`.
pub fn rank(
    visual_matches: &[VisualMatch],
    marketplace: &[MarketplaceSourceResult],
    cap: usize,
) -> RankedResultSet {
    let mut groups = Vec::with_capacity(marketplace.len() + 1);

    let visual: Vec<RankedListing> = visual_matches
        .iter()
        .filter_map(|m| {
            let title = m.title.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
            let url = m.url.trim();
            if url.is_empty() {
                return None;
            }
            Some(RankedListing {
                title: title.to_string(),
                price: None,
                url: url.to_string(),
                is_visual_match: true,
                match_score: Some(m.score),
            })
        })
        .take(cap)
        .collect();
    if !visual.is_empty() {
        groups.push(RankedGroup {
            tier: TIER_VISUAL,
            is_visual_match: true,
            source_name: VISUAL_MATCH_SOURCE.to_string(),
            listings: visual,
        });
    }

    for src in marketplace.iter().filter(|s| !s.listings.is_empty()) {
        groups.push(RankedGroup {
            tier: TIER_MARKETPLACE,
            is_visual_match: false,
            source_name: src.source_name.clone(),
            listings: src
                .listings
                .iter()
                .map(|l| RankedListing {
                    title: l.title.clone(),
                    price: Some(l.price),
                    url: l.url.clone(),
                    is_visual_match: false,
                    match_score: None,
                })
                .collect(),
        });
    }

    tracing::debug!(
        target: "ranking",
        groups = groups.len(),
        visual = groups.first().filter(|g| g.is_visual_match).map_or(0, |g| g.listings.len()),
        "ranked result set built"
    );
    RankedResultSet { groups }
}
