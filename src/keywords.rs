// src/keywords.rs
//! Search keyword derivation.
//!
//! Image signals come first (best guess, web entities, labels) and are never
//! mixed with the user's item name or category. Metadata is only consulted when
//! recognition produced nothing usable.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::error::PipelineError;
use crate::recognition::{RecognitionResult, ScoredText};

pub const MAX_KEYWORDS: usize = 10;
pub const MIN_TOKEN_LEN: usize = 3;

const ENTITY_MIN_SCORE: f32 = 0.4;
const MAX_ENTITIES: usize = 5;
const LABEL_MIN_SCORE: f32 = 0.6;
const MAX_LABELS: usize = 8;
const AGE_MARKERS: [&str; 3] = ["antique", "vintage", "old"];

/// Bounded, lower-cased, de-duplicated keyword tokens in priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SearchKeywords(Vec<String>);

impl SearchKeywords {
    /// Split phrases into tokens, lower-case, de-duplicate (first seen wins),
    /// drop short tokens and cap at [`MAX_KEYWORDS`].
    pub fn from_phrases<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for phrase in phrases {
            for raw in phrase.as_ref().split_whitespace() {
                let tok = raw
                    .trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase();
                if tok.chars().count() < MIN_TOKEN_LEN {
                    continue;
                }
                if seen.insert(tok.clone()) {
                    out.push(tok);
                }
                if out.len() == MAX_KEYWORDS {
                    return Self(out);
                }
            }
        }
        Self(out)
    }

    /// Like [`from_phrases`](Self::from_phrases) without the length floor.
    fn whole_tokens<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for phrase in phrases {
            for raw in phrase.as_ref().split_whitespace() {
                let tok = raw
                    .trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase();
                if !tok.is_empty() && !out.contains(&tok) {
                    out.push(tok);
                }
            }
        }
        out.truncate(MAX_KEYWORDS);
        Self(out)
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Single-space joined query string.
    pub fn as_query(&self) -> String {
        self.0.join(" ")
    }
}

impl fmt::Display for SearchKeywords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_query())
    }
}

/// Static category → keyword table used only in fallback mode.
pub fn category_keywords(category: &str) -> &'static [&'static str] {
    match category.trim().to_ascii_lowercase().as_str() {
        "" => &[],
        "furniture" => &["antique furniture", "vintage"],
        "watches" => &["vintage watch", "antique timepiece"],
        "jewelry" => &["antique jewelry", "vintage"],
        "art" => &["antique art", "vintage painting"],
        "ceramics" => &["antique ceramic", "vintage pottery"],
        "textiles" => &["vintage textile", "antique fabric"],
        "books" => &["antique book", "rare book"],
        "other" => &["antique", "vintage collectible"],
        _ => &[],
    }
}

/// Category table entries followed by the literal item name.
pub fn fallback_phrases(item_name: &str, category: &str) -> Vec<String> {
    let mut phrases: Vec<String> = category_keywords(category)
        .iter()
        .map(|s| s.to_string())
        .collect();
    let name = item_name.trim();
    if !name.is_empty() && !phrases.iter().any(|p| p == name) {
        phrases.push(name.to_string());
    }
    phrases
}

/// Derive search keywords for a recognition result.
///
/// Fails with [`PipelineError::InvalidInput`] only when neither the image nor the
/// item metadata yields anything to search for.
pub fn extract(
    recognition: &RecognitionResult,
    fallback_name: &str,
    fallback_category: &str,
) -> Result<SearchKeywords, PipelineError> {
    if recognition.has_image_signal() {
        let kw = image_keywords(recognition);
        if !kw.is_empty() {
            tracing::debug!(target: "keywords", keywords = %kw, "keywords from image content");
            return Ok(kw);
        }
        // Signal exists but nothing cleared the thresholds: still image-only.
        let relaxed = relaxed_image_keywords(recognition);
        if !relaxed.is_empty() {
            tracing::debug!(target: "keywords", keywords = %relaxed, "low-confidence image keywords");
            return Ok(relaxed);
        }
        // Only short tokens such as "TV": keep them rather than reach for metadata.
        let short = SearchKeywords::whole_tokens(image_phrases(recognition));
        if !short.is_empty() {
            tracing::debug!(target: "keywords", keywords = %short, "short image keywords kept whole");
            return Ok(short);
        }
    }

    let kw = metadata_keywords(fallback_name, fallback_category);
    if kw.is_empty() {
        return Err(PipelineError::InvalidInput(
            "no keywords available: recognition produced no signal and item name/category are empty"
                .to_string(),
        ));
    }
    tracing::info!(target: "keywords", keywords = %kw, "fallback keywords from item metadata");
    Ok(kw)
}

/// Keywords from user-entered metadata. A name made only of short tokens is kept
/// whole, and so is a category the table does not know when there is no name.
pub fn metadata_keywords(item_name: &str, category: &str) -> SearchKeywords {
    let kw = SearchKeywords::from_phrases(fallback_phrases(item_name, category));
    if !kw.is_empty() {
        return kw;
    }
    let name = SearchKeywords::whole_tokens([item_name]);
    if !name.is_empty() {
        return name;
    }
    // Category outside the table and no usable name.
    SearchKeywords::whole_tokens([category])
}

fn image_keywords(r: &RecognitionResult) -> SearchKeywords {
    let mut phrases: Vec<&str> = Vec::new();

    // 1) best guesses, always
    phrases.extend(r.best_guess_labels.iter().map(String::as_str));

    // 2) confident web entities, strongest first
    let mut entities: Vec<&ScoredText> = r
        .web_entities
        .iter()
        .filter(|e| e.score > ENTITY_MIN_SCORE)
        .collect();
    entities.sort_by(|a, b| b.score.total_cmp(&a.score));
    phrases.extend(
        entities
            .into_iter()
            .take(MAX_ENTITIES)
            .map(|e| e.description.as_str()),
    );

    // 3) confident labels, provider order
    phrases.extend(
        r.labels
            .iter()
            .filter(|l| l.score > LABEL_MIN_SCORE)
            .take(MAX_LABELS)
            .map(|l| l.description.as_str()),
    );

    // 4) age markers only when the image itself suggests age
    let aged = phrases.iter().any(|p| {
        let p = p.to_lowercase();
        AGE_MARKERS.iter().any(|m| p.contains(m))
    });
    if aged {
        phrases.push("antique");
        phrases.push("vintage");
    }

    SearchKeywords::from_phrases(phrases)
}

/// Every image phrase: best guesses, then entities and labels strongest first.
fn image_phrases(r: &RecognitionResult) -> Vec<&str> {
    let mut scored: Vec<&ScoredText> = r.web_entities.iter().chain(r.labels.iter()).collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    r.best_guess_labels
        .iter()
        .map(String::as_str)
        .chain(scored.into_iter().map(|s| s.description.as_str()))
        .collect()
}

fn relaxed_image_keywords(r: &RecognitionResult) -> SearchKeywords {
    SearchKeywords::from_phrases(image_phrases(r))
}
