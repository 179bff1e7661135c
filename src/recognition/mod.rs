// src/recognition/mod.rs
//! Recognition adapter: turns an image into a normalized [`RecognitionResult`].
//!
//! Adapters never fail towards the caller. Any provider problem degrades to a
//! fallback result built from the item's name and category.

pub mod vision;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::keywords::fallback_phrases;

pub use vision::VisionRecognizer;

/// Score assumed for a visual match the provider did not score.
pub const DEFAULT_MATCH_SCORE: f32 = 0.8;

/// A description with its provider confidence in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredText {
    pub description: String,
    pub score: f32,
}

impl ScoredText {
    pub fn new(description: impl Into<String>, score: f32) -> Self {
        Self {
            description: description.into(),
            score: score.clamp(0.0, 1.0),
        }
    }
}

/// A candidate found by image similarity. Price is unknown at discovery time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualMatch {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default = "default_match_score")]
    pub score: f32,
}

fn default_match_score() -> f32 {
    DEFAULT_MATCH_SCORE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionSource {
    /// Signals came from the recognition provider.
    Provider,
    /// Provider unavailable; labels were derived from item metadata.
    Fallback,
    /// Provider unavailable and there was no metadata to fall back on.
    Error,
}

/// Normalized recognition output. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionResult {
    pub best_guess_title: String,
    /// Provider's best-guess labels (web detection); empty for fallback results.
    pub best_guess_labels: Vec<String>,
    pub labels: Vec<ScoredText>,
    pub web_entities: Vec<ScoredText>,
    pub visual_matches: Vec<VisualMatch>,
    pub confidence_tier: ConfidenceTier,
    pub source: RecognitionSource,
}

impl RecognitionResult {
    /// Result used whenever the provider cannot be consulted.
    ///
    /// Labels come from the static category table plus the item name. With no
    /// name and no category there is nothing to fall back on and the result is
    /// tagged [`RecognitionSource::Error`].
    pub fn fallback(fallback_name: &str, fallback_category: &str) -> Self {
        let phrases = fallback_phrases(fallback_name, fallback_category);
        let source = if fallback_name.trim().is_empty() && fallback_category.trim().is_empty() {
            RecognitionSource::Error
        } else {
            RecognitionSource::Fallback
        };
        Self {
            best_guess_title: fallback_name.trim().to_string(),
            best_guess_labels: Vec::new(),
            labels: phrases.into_iter().map(|p| ScoredText::new(p, 1.0)).collect(),
            web_entities: Vec::new(),
            visual_matches: Vec::new(),
            confidence_tier: ConfidenceTier::Low,
            source,
        }
    }

    pub fn is_from_provider(&self) -> bool {
        self.source == RecognitionSource::Provider
    }

    /// True when the provider found anything describing the image.
    pub fn has_image_signal(&self) -> bool {
        self.is_from_provider()
            && (!self.best_guess_labels.is_empty()
                || !self.labels.is_empty()
                || !self.web_entities.is_empty())
    }
}

/// `high` with a best guess or with at least five labels topped above 0.8,
/// `medium` with more than three labels, otherwise `low`.
pub fn confidence_tier(best_guess_labels: &[String], labels: &[ScoredText]) -> ConfidenceTier {
    if !best_guess_labels.is_empty() {
        return ConfidenceTier::High;
    }
    let top = labels.iter().map(|l| l.score).fold(0.0f32, f32::max);
    if labels.len() >= 5 && top > 0.8 {
        ConfidenceTier::High
    } else if labels.len() > 3 {
        ConfidenceTier::Medium
    } else {
        ConfidenceTier::Low
    }
}

/// Where the image lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    Url(String),
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl ImageRef {
    /// `http(s)://` references are URLs, anything else a local path.
    pub fn parse(reference: &str) -> Self {
        let r = reference.trim();
        let lower = r.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            ImageRef::Url(r.to_string())
        } else {
            ImageRef::Path(PathBuf::from(r))
        }
    }

    /// Short anonymized id for logs. Never log the reference itself.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            ImageRef::Url(u) => hasher.update(u.as_bytes()),
            ImageRef::Path(p) => hasher.update(p.to_string_lossy().as_bytes()),
            ImageRef::Bytes(b) => hasher.update(b),
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(12);
        for b in digest.iter().take(6) {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        out
    }
}

/// External visual-recognition provider, wrapped so it never raises.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn identify(
        &self,
        image: &ImageRef,
        fallback_name: &str,
        fallback_category: &str,
    ) -> RecognitionResult;

    /// Provider name used in the call log.
    fn provider_name(&self) -> &'static str;

    /// Request URL used in the call log when the caller abandons the call.
    fn endpoint(&self) -> String;
}

/// Recognizer returning a fixed result (or always falling back). For local runs and tests.
#[derive(Debug, Clone)]
pub struct MockRecognizer {
    pub fixed: Option<RecognitionResult>,
    pub delay: Option<std::time::Duration>,
}

impl MockRecognizer {
    pub fn returning(result: RecognitionResult) -> Self {
        Self {
            fixed: Some(result),
            delay: None,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            fixed: None,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Recognizer for MockRecognizer {
    async fn identify(
        &self,
        _image: &ImageRef,
        fallback_name: &str,
        fallback_category: &str,
    ) -> RecognitionResult {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        match &self.fixed {
            Some(r) => r.clone(),
            None => RecognitionResult::fallback(fallback_name, fallback_category),
        }
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }

    fn endpoint(&self) -> String {
        "mock://recognizer".to_string()
    }
}
