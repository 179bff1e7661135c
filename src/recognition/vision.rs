// src/recognition/vision.rs
//! REST "images:annotate" recognition provider (label + web detection).

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use metrics::counter;
use serde::{Deserialize, Serialize};

use super::{
    confidence_tier, ImageRef, RecognitionResult, RecognitionSource, Recognizer, ScoredText,
    VisualMatch, DEFAULT_MATCH_SCORE,
};
use crate::call_log::CallLogger;
use crate::config::RecognitionConfig;
use crate::error::RecognitionError;

const PROVIDER_NAME: &str = "Google Vision API";
const MAX_MATCHING_PAGES: usize = 10;
const MAX_VISUAL_MATCHES: usize = 15;

pub struct VisionRecognizer {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    max_results: u32,
    logger: CallLogger,
}

impl VisionRecognizer {
    pub fn new(cfg: &RecognitionConfig, logger: CallLogger) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("worthify-estimator/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_millis(cfg.timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
            api_key: cfg.resolved_api_key(),
            max_results: cfg.max_results,
            logger,
        })
    }

    fn request_url(&self, key: &str) -> String {
        format!("{}?key={}", self.endpoint, urlencoding::encode(key))
    }

    async fn load_image(&self, image: &ImageRef) -> Result<Vec<u8>, RecognitionError> {
        let bytes = match image {
            ImageRef::Bytes(b) => b.clone(),
            ImageRef::Path(p) => tokio::fs::read(p)
                .await
                .map_err(|e| RecognitionError::Image(format!("{}: {e}", p.display())))?,
            ImageRef::Url(u) => {
                let resp = self.http.get(u).send().await?;
                if !resp.status().is_success() {
                    return Err(RecognitionError::Image(format!(
                        "download returned {}",
                        resp.status().as_u16()
                    )));
                }
                resp.bytes().await?.to_vec()
            }
        };
        if bytes.is_empty() {
            return Err(RecognitionError::Image("empty image".to_string()));
        }
        Ok(bytes)
    }

    async fn annotate(&self, image: &ImageRef) -> Result<AnnotateResponse, RecognitionError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(RecognitionError::MissingCredentials)?;
        let bytes = self.load_image(image).await?;
        let url = self.request_url(key);

        let body = AnnotateRequest {
            requests: vec![ImageRequest {
                image: ImageContent {
                    content: base64::engine::general_purpose::STANDARD.encode(&bytes),
                },
                features: vec![
                    Feature {
                        kind: "LABEL_DETECTION",
                        max_results: self.max_results,
                    },
                    Feature {
                        kind: "WEB_DETECTION",
                        max_results: self.max_results,
                    },
                ],
            }],
        };

        counter!("recognition_calls_total").increment(1);
        let resp = match self.http.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                let err = RecognitionError::from(e);
                self.logger.record(PROVIDER_NAME, &url, &err.status_label());
                return Err(err);
            }
        };
        let status = resp.status();
        self.logger
            .record(PROVIDER_NAME, &url, &status.as_u16().to_string());
        if !status.is_success() {
            return Err(RecognitionError::Status(status.as_u16()));
        }

        let batch: BatchResponse = resp
            .json()
            .await
            .map_err(|e| RecognitionError::Malformed(e.to_string()))?;
        let first = batch
            .responses
            .into_iter()
            .next()
            .ok_or_else(|| RecognitionError::Malformed("empty responses array".to_string()))?;
        if let Some(err) = first.error {
            return Err(RecognitionError::Malformed(err.message));
        }
        Ok(first)
    }
}

#[async_trait]
impl Recognizer for VisionRecognizer {
    async fn identify(
        &self,
        image: &ImageRef,
        fallback_name: &str,
        fallback_category: &str,
    ) -> RecognitionResult {
        let image_id = image.fingerprint();
        match self.annotate(image).await {
            Ok(resp) => {
                let result = normalize_response(resp, fallback_name);
                tracing::info!(
                    target: "recognition",
                    image = %image_id,
                    title = %result.best_guess_title,
                    labels = result.labels.len(),
                    visual_matches = result.visual_matches.len(),
                    tier = ?result.confidence_tier,
                    "image recognized"
                );
                result
            }
            Err(e) => {
                counter!("recognition_fallback_total").increment(1);
                tracing::warn!(target: "recognition", image = %image_id, error = %e, "recognition unavailable; using item metadata");
                RecognitionResult::fallback(fallback_name, fallback_category)
            }
        }
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

/// Map a provider response onto the normalized contract.
pub(crate) fn normalize_response(resp: AnnotateResponse, fallback_name: &str) -> RecognitionResult {
    let labels: Vec<ScoredText> = resp
        .label_annotations
        .into_iter()
        .filter(|l| !l.description.trim().is_empty())
        .map(|l| ScoredText::new(l.description.trim(), l.score))
        .collect();

    let web = resp.web_detection.unwrap_or_default();
    let best_guess_labels: Vec<String> = web
        .best_guess_labels
        .into_iter()
        .map(|b| b.label.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    let web_entities: Vec<ScoredText> = web
        .web_entities
        .into_iter()
        .filter_map(|e| {
            let d = e.description?;
            let d = d.trim();
            (!d.is_empty()).then(|| ScoredText::new(d, e.score))
        })
        .collect();

    let mut visual_matches: Vec<VisualMatch> = web
        .visually_similar_images
        .into_iter()
        .filter(|img| !img.url.is_empty())
        .map(|img| VisualMatch {
            url: img.url,
            title: None,
            score: img.score.unwrap_or(DEFAULT_MATCH_SCORE),
        })
        .collect();
    visual_matches.extend(
        web.pages_with_matching_images
            .into_iter()
            .take(MAX_MATCHING_PAGES)
            .filter_map(|p| match (p.url, p.page_title) {
                (Some(url), Some(title)) if !url.is_empty() && !title.is_empty() => {
                    Some(VisualMatch {
                        url,
                        title: Some(crate::marketplace::normalize_title(&title)),
                        score: p.score.unwrap_or(DEFAULT_MATCH_SCORE),
                    })
                }
                _ => None,
            }),
    );
    visual_matches.truncate(MAX_VISUAL_MATCHES);

    let best_guess_title = best_guess_labels
        .first()
        .cloned()
        .or_else(|| web_entities.first().map(|e| e.description.clone()))
        .unwrap_or_else(|| fallback_name.trim().to_string());
    let confidence_tier = confidence_tier(&best_guess_labels, &labels);

    RecognitionResult {
        best_guess_title,
        best_guess_labels,
        labels,
        web_entities,
        visual_matches,
        confidence_tier,
        source: RecognitionSource::Provider,
    }
}

// ---- wire types ----

#[derive(Serialize)]
struct AnnotateRequest {
    requests: Vec<ImageRequest>,
}

#[derive(Serialize)]
struct ImageRequest {
    image: ImageContent,
    features: Vec<Feature>,
}

#[derive(Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    responses: Vec<AnnotateResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AnnotateResponse {
    #[serde(default)]
    label_annotations: Vec<LabelAnnotation>,
    #[serde(default)]
    web_detection: Option<WebDetection>,
    #[serde(default)]
    error: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
struct LabelAnnotation {
    #[serde(default)]
    description: String,
    #[serde(default)]
    score: f32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebDetection {
    #[serde(default)]
    web_entities: Vec<WebEntity>,
    #[serde(default)]
    best_guess_labels: Vec<BestGuessLabel>,
    #[serde(default)]
    visually_similar_images: Vec<WebImage>,
    #[serde(default)]
    pages_with_matching_images: Vec<WebPage>,
}

#[derive(Debug, Deserialize)]
struct WebEntity {
    description: Option<String>,
    #[serde(default)]
    score: f32,
}

#[derive(Debug, Deserialize)]
struct BestGuessLabel {
    #[serde(default)]
    label: String,
}

#[derive(Debug, Deserialize)]
struct WebImage {
    #[serde(default)]
    url: String,
    score: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebPage {
    url: Option<String>,
    page_title: Option<String>,
    score: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    message: String,
}
