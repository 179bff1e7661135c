// src/pipeline.rs
//! Recognition → keywords → marketplace fan-out → ranking → statistics.
//!
//! Only [`PipelineError::InvalidInput`] aborts a run. Recognition and
//! marketplace problems degrade the result and end up in the call log.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::time::Instant;

use crate::call_log::CallLogger;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::keywords::{self, SearchKeywords};
use crate::marketplace::{MarketplaceFetcher, SourceReport};
use crate::ranking::{self, RankedResultSet, DEFAULT_VISUAL_MATCH_CAP};
use crate::recognition::{
    ConfidenceTier, ImageRef, RecognitionResult, RecognitionSource, Recognizer,
};
use crate::stats::{self, PriceEstimate, PricedListing};

const METADATA_LABELS: usize = 5;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Analyses started.");
        describe_counter!(
            "pipeline_invalid_input_total",
            "Analyses aborted because nothing could be searched for."
        );
        describe_counter!("recognition_calls_total", "Recognition provider requests.");
        describe_counter!(
            "recognition_fallback_total",
            "Recognitions answered from item metadata."
        );
        describe_counter!(
            "marketplace_source_errors_total",
            "Failed or timed-out marketplace source calls."
        );
        describe_counter!("marketplace_listings_total", "Listings returned by sources.");
        describe_counter!(
            "call_log_dropped_total",
            "Call records dropped because the log queue was full or closed."
        );
        describe_histogram!("marketplace_fetch_ms", "Marketplace fan-out time in milliseconds.");
    });
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub item_name: String,
    pub category: String,
    pub image: Option<ImageRef>,
    /// Caller-entered keywords; honored only when there is no image.
    pub keywords: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionMetadata {
    pub title: String,
    pub confidence_tier: ConfidenceTier,
    pub source: RecognitionSource,
    pub labels: Vec<String>,
}

impl RecognitionMetadata {
    fn from_result(r: &RecognitionResult) -> Self {
        Self {
            title: r.best_guess_title.clone(),
            confidence_tier: r.confidence_tier,
            source: r.source,
            labels: r
                .labels
                .iter()
                .take(METADATA_LABELS)
                .map(|l| l.description.clone())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutcome {
    pub estimate: PriceEstimate,
    pub ranked_results: RankedResultSet,
    pub keywords_used: String,
    pub recognition_metadata: RecognitionMetadata,
    /// Bounded priced listings for persistence.
    pub evidence: Vec<PricedListing>,
    /// True when keywords came from the recognition provider.
    pub image_analysis_used: bool,
    pub source_reports: Vec<SourceReport>,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub deadline: Duration,
    pub evidence_limit: usize,
    pub visual_match_cap: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(cfg: &PipelineConfig) -> Self {
        Self {
            deadline: Duration::from_millis(cfg.deadline_ms),
            evidence_limit: cfg.evidence_limit,
            visual_match_cap: if cfg.visual_match_cap == 0 {
                DEFAULT_VISUAL_MATCH_CAP
            } else {
                cfg.visual_match_cap
            },
        }
    }
}

pub struct Pipeline {
    recognizer: Arc<dyn Recognizer>,
    fetcher: MarketplaceFetcher,
    settings: PipelineSettings,
    logger: CallLogger,
}

impl Pipeline {
    pub fn new(
        recognizer: Arc<dyn Recognizer>,
        fetcher: MarketplaceFetcher,
        settings: PipelineSettings,
        logger: CallLogger,
    ) -> Self {
        ensure_metrics_described();
        Self {
            recognizer,
            fetcher,
            settings,
            logger,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn source_names(&self) -> Vec<String> {
        self.fetcher.source_names()
    }

    pub async fn analyze(&self, req: &AnalysisRequest) -> Result<AnalysisOutcome, PipelineError> {
        self.analyze_with_deadline(req, Instant::now() + self.settings.deadline)
            .await
    }

    /// Run one analysis; `deadline` bounds recognition and every marketplace call.
    pub async fn analyze_with_deadline(
        &self,
        req: &AnalysisRequest,
        deadline: Instant,
    ) -> Result<AnalysisOutcome, PipelineError> {
        counter!("pipeline_runs_total").increment(1);
        let name = req.item_name.trim();
        let category = req.category.trim();
        let user_keywords = req
            .keywords
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty());

        let recognition = match &req.image {
            Some(image) => {
                if let Some(k) = user_keywords {
                    tracing::info!(target: "pipeline", ignored = k, "user keywords ignored in favor of image analysis");
                }
                self.recognize(image, name, category, deadline).await
            }
            None => {
                tracing::info!(target: "pipeline", "no image; searching by keywords or item metadata");
                RecognitionResult::fallback(name, category)
            }
        };

        let keywords = match self.select_keywords(&recognition, req.image.is_some(), user_keywords, name, category) {
            Ok(k) => k,
            Err(e) => {
                counter!("pipeline_invalid_input_total").increment(1);
                tracing::warn!(target: "pipeline", error = %e, "analysis aborted");
                return Err(e);
            }
        };
        let query = keywords.as_query();

        let fetched = self.fetcher.fetch_detailed(&query, Some(deadline)).await;
        let ranked = ranking::rank(
            &recognition.visual_matches,
            &fetched.results,
            self.settings.visual_match_cap,
        );
        let estimate = stats::summarize(&ranked);
        let evidence = stats::evidence(&ranked, self.settings.evidence_limit);

        tracing::info!(
            target: "pipeline",
            keywords = %query,
            listings = estimate.listing_count,
            average = estimate.average_price,
            visual_matches = ranked.visual_match_count(),
            "analysis finished"
        );

        Ok(AnalysisOutcome {
            estimate,
            ranked_results: ranked,
            keywords_used: query,
            recognition_metadata: RecognitionMetadata::from_result(&recognition),
            evidence,
            image_analysis_used: recognition.has_image_signal(),
            source_reports: fetched.reports,
        })
    }

    async fn recognize(
        &self,
        image: &ImageRef,
        name: &str,
        category: &str,
        deadline: Instant,
    ) -> RecognitionResult {
        match tokio::time::timeout_at(deadline, self.recognizer.identify(image, name, category)).await {
            Ok(r) => r,
            Err(_) => {
                self.logger.record(
                    self.recognizer.provider_name(),
                    &self.recognizer.endpoint(),
                    "timeout",
                );
                counter!("recognition_fallback_total").increment(1);
                tracing::warn!(target: "pipeline", image = %image.fingerprint(), "recognition hit the deadline; using item metadata");
                RecognitionResult::fallback(name, category)
            }
        }
    }

    fn select_keywords(
        &self,
        recognition: &RecognitionResult,
        has_image: bool,
        user_keywords: Option<&str>,
        name: &str,
        category: &str,
    ) -> Result<SearchKeywords, PipelineError> {
        if !has_image {
            if let Some(k) = user_keywords {
                let kw = SearchKeywords::from_phrases([k]);
                if !kw.is_empty() {
                    return Ok(kw);
                }
            }
        }
        keywords::extract(recognition, name, category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::providers::{FixtureListing, FixtureSource};
    use crate::marketplace::MarketplaceSource;
    use crate::recognition::MockRecognizer;

    fn pipeline(recognizer: MockRecognizer, sources: Vec<Arc<dyn MarketplaceSource>>) -> Pipeline {
        let fetcher = MarketplaceFetcher::new(sources, Duration::from_secs(2), CallLogger::disabled());
        Pipeline::new(
            Arc::new(recognizer),
            fetcher,
            PipelineSettings::default(),
            CallLogger::disabled(),
        )
    }

    fn etsy() -> Arc<dyn MarketplaceSource> {
        Arc::new(FixtureSource::new(
            "Etsy",
            vec![FixtureListing::new("Handcrafted {keywords}", 80.0, "https://etsy.example")],
        ))
    }

    #[tokio::test]
    async fn user_keywords_used_without_image() {
        let p = pipeline(MockRecognizer::unavailable(), vec![etsy()]);
        let out = p
            .analyze(&AnalysisRequest {
                item_name: "Thing".into(),
                category: "Other".into(),
                image: None,
                keywords: Some("Brass Ship Clock".into()),
            })
            .await
            .unwrap();
        assert_eq!(out.keywords_used, "brass ship clock");
        assert!(!out.image_analysis_used);
        assert_eq!(out.recognition_metadata.source, RecognitionSource::Fallback);
        assert_eq!(out.estimate.listing_count, 1);
    }

    #[tokio::test]
    async fn nothing_to_search_is_invalid_input() {
        let p = pipeline(MockRecognizer::unavailable(), vec![etsy()]);
        let err = p.analyze(&AnalysisRequest::default()).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_recognizer_falls_back_at_deadline() {
        let p = pipeline(
            MockRecognizer::unavailable().with_delay(Duration::from_secs(60)),
            vec![etsy()],
        );
        let out = p
            .analyze_with_deadline(
                &AnalysisRequest {
                    item_name: "Pocket Watch".into(),
                    category: "Watches".into(),
                    image: Some(ImageRef::parse("uploads/w.jpg")),
                    keywords: None,
                },
                Instant::now() + Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(out.recognition_metadata.source, RecognitionSource::Fallback);
        assert!(out.keywords_used.contains("pocket"));
    }
}
