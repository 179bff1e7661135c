use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::call_log::{
    ApiCallRecord, CallLogFilter, CallLogSink, CallLogger, FanoutSink, JsonlFileSink,
    MemoryLogSink, ProviderStats,
};
use crate::config::{AppConfig, SinkKind};
use crate::error::PipelineError;
use crate::marketplace::providers::build_sources;
use crate::marketplace::{MarketplaceFetcher, SourceReport};
use crate::pipeline::{AnalysisRequest, Pipeline, PipelineSettings, RecognitionMetadata};
use crate::ranking::RankedResultSet;
use crate::recognition::{ImageRef, VisionRecognizer};
use crate::store::{EstimateStore, MemoryEstimateStore};

const API_USED: &str = "Multiple APIs";
const DEFAULT_LOG_LIMIT: usize = 100;
const DEFAULT_CLEANUP_DAYS: i64 = 30;

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    store: Arc<dyn EstimateStore>,
    call_log: Arc<MemoryLogSink>,
}

impl AppState {
    pub fn new(
        pipeline: Arc<Pipeline>,
        store: Arc<dyn EstimateStore>,
        call_log: Arc<MemoryLogSink>,
    ) -> Self {
        Self {
            pipeline,
            store,
            call_log,
        }
    }

    /// Wire recognizer, sources, call log and store from config.
    /// Must be called inside a Tokio runtime (spawns the call-log drain task).
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let memory = Arc::new(MemoryLogSink::with_capacity(cfg.call_log.retention));
        let sink: Arc<dyn CallLogSink> = match cfg.call_log.sink {
            SinkKind::Memory => memory.clone(),
            SinkKind::Jsonl => {
                let path = cfg
                    .call_log
                    .path
                    .clone()
                    .context("call_log.path is required for the jsonl sink")?;
                let mem: Arc<dyn CallLogSink> = memory.clone();
                let file: Arc<dyn CallLogSink> = Arc::new(JsonlFileSink::new(path));
                Arc::new(FanoutSink::new(vec![mem, file]))
            }
        };
        let (logger, _drain) = CallLogger::spawn(sink, cfg.call_log.capacity);

        let recognizer = VisionRecognizer::new(&cfg.recognition, logger.clone())
            .context("building recognition client")?;
        let sources = build_sources(&cfg.marketplace).context("building marketplace sources")?;
        let fetcher = MarketplaceFetcher::new(
            sources,
            Duration::from_millis(cfg.marketplace.timeout_ms.max(1)),
            logger.clone(),
        );
        let pipeline = Pipeline::new(
            Arc::new(recognizer),
            fetcher,
            PipelineSettings::from(&cfg.pipeline),
            logger,
        );
        tracing::info!(
            target: "api",
            sources = ?pipeline.source_names(),
            "estimator wired"
        );
        Ok(Self::new(
            Arc::new(pipeline),
            Arc::new(MemoryEstimateStore::default()),
            memory,
        ))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/prices/analyze", post(analyze_prices))
        .route("/api/prices/history/{item_id}", get(price_history))
        .route("/api/items/search-similar", post(search_similar))
        .route("/api/logs", get(get_logs))
        .route("/api/logs/stats", get(get_log_stats))
        .route("/api/logs/cleanup", delete(cleanup_logs))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    AnalysisFailed(String),
    Internal(anyhow::Error),
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::InvalidInput(msg) => ApiError::BadRequest(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::AnalysisFailed(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
            ApiError::Internal(e) => {
                tracing::error!(target: "api", error = ?e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct AnalyzeReq {
    #[serde(default)]
    item_id: Option<Value>,
    #[serde(default)]
    item_name: String,
    #[serde(default)]
    category: String,
    /// http(s) URL or server-local path
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    image_base64: Option<String>,
    #[serde(default)]
    keywords: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisBody {
    average_price: String,
    min_price: String,
    max_price: String,
    price_range: String,
    total_listings: usize,
    currency: String,
    /// Visual matches first, then marketplaces in configured order.
    marketplaces: RankedResultSet,
    search_keywords: String,
    recognition: RecognitionMetadata,
    image_analysis_used: bool,
    visual_matches_count: usize,
    source_reports: Vec<SourceReport>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResp {
    message: &'static str,
    prediction_id: u64,
    analysis: AnalysisBody,
}

async fn analyze_prices(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeReq>,
) -> Result<Json<AnalyzeResp>, ApiError> {
    let item_id = body
        .item_id
        .as_ref()
        .and_then(id_string)
        .ok_or_else(|| ApiError::BadRequest("Item ID is required".to_string()))?;
    let image = image_ref(body.image_url.as_deref(), body.image_base64.as_deref())?;

    let req = AnalysisRequest {
        item_name: body.item_name,
        category: body.category,
        image,
        keywords: body.keywords,
    };
    let out = state.pipeline.analyze(&req).await?;

    let prediction_id = state
        .store
        .save(&item_id, &out.estimate, &out.evidence, API_USED)
        .await
        .map_err(ApiError::Internal)?;
    tracing::info!(target: "api", item_id = %item_id, prediction_id, "price analysis completed");

    let e = &out.estimate;
    Ok(Json(AnalyzeResp {
        message: "Price analysis completed",
        prediction_id,
        analysis: AnalysisBody {
            average_price: format!("{:.2}", e.average_price),
            min_price: format!("{:.2}", e.min_price),
            max_price: format!("{:.2}", e.max_price),
            price_range: e.price_range(),
            total_listings: e.listing_count,
            currency: e.currency.clone(),
            visual_matches_count: out.ranked_results.visual_match_count(),
            marketplaces: out.ranked_results,
            search_keywords: out.keywords_used,
            recognition: out.recognition_metadata,
            image_analysis_used: out.image_analysis_used,
            source_reports: out.source_reports,
        },
    }))
}

async fn price_history(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> Result<Response, ApiError> {
    let item_id = item_id.trim();
    if item_id.is_empty() {
        return Err(ApiError::BadRequest("Item ID is required".to_string()));
    }
    match state.store.history(item_id).await.map_err(ApiError::Internal)? {
        Some(h) => Ok(Json(h).into_response()),
        None => Err(ApiError::NotFound(format!("no price history for item {item_id}"))),
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SimilarReq {
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    image_base64: Option<String>,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
struct SimilarItem {
    title: String,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
    source: String,
    match_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    similarity: Option<u32>,
}

async fn search_similar(
    State(state): State<AppState>,
    Json(body): Json<SimilarReq>,
) -> Result<Json<Value>, ApiError> {
    let image = image_ref(body.image_url.as_deref(), body.image_base64.as_deref())?
        .ok_or_else(|| ApiError::BadRequest("Image is required".to_string()))?;
    let req = AnalysisRequest {
        image: Some(image),
        ..AnalysisRequest::default()
    };
    let out = match state.pipeline.analyze(&req).await {
        Ok(o) => o,
        Err(PipelineError::InvalidInput(msg)) => {
            tracing::warn!(target: "api", reason = %msg, "similar-item search without image signal");
            return Err(ApiError::AnalysisFailed("Image analysis failed".to_string()));
        }
    };

    let results = similar_items(&out.ranked_results);
    Ok(Json(json!({
        "success": true,
        "totalResults": results.len(),
        "imageAnalysis": {
            "title": out.recognition_metadata.title,
            "keywords": out.keywords_used,
            "source": out.recognition_metadata.source,
            "confidence": out.recognition_metadata.confidence_tier,
            "labels": out.recognition_metadata.labels,
        },
        "results": results,
    })))
}

/// Visual matches (with similarity %) followed by marketplace listings.
fn similar_items(set: &RankedResultSet) -> Vec<SimilarItem> {
    set.listings()
        .map(|(g, l)| {
            if g.is_visual_match {
                SimilarItem {
                    title: l.title.clone(),
                    url: l.url.clone(),
                    price: None,
                    source: "Visual Match".to_string(),
                    match_type: "visual_match",
                    similarity: l.match_score.map(|s| (s * 100.0).round() as u32),
                }
            } else {
                SimilarItem {
                    title: l.title.clone(),
                    url: l.url.clone(),
                    price: l.price,
                    source: g.source_name.clone(),
                    match_type: "marketplace_search",
                    similarity: None,
                }
            }
        })
        .collect()
}

#[derive(Deserialize, Default)]
struct LogsQuery {
    #[serde(default, alias = "apiName")]
    api_name: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default, alias = "startDate")]
    start_date: Option<DateTime<Utc>>,
    #[serde(default, alias = "endDate")]
    end_date: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct LogsResp {
    success: bool,
    count: usize,
    logs: Vec<ApiCallRecord>,
}

async fn get_logs(State(state): State<AppState>, Query(q): Query<LogsQuery>) -> Json<LogsResp> {
    let logs = state.call_log.query(&CallLogFilter {
        provider_name: q.api_name.filter(|s| !s.trim().is_empty()),
        since: q.start_date,
        until: q.end_date,
        limit: Some(q.limit.unwrap_or(DEFAULT_LOG_LIMIT)),
    });
    Json(LogsResp {
        success: true,
        count: logs.len(),
        logs,
    })
}

#[derive(Serialize)]
struct StatsResp {
    success: bool,
    summary: Vec<ProviderStats>,
}

async fn get_log_stats(State(state): State<AppState>) -> Json<StatsResp> {
    Json(StatsResp {
        success: true,
        summary: state.call_log.stats(),
    })
}

#[derive(Deserialize, Default)]
struct CleanupQuery {
    #[serde(default)]
    days: Option<i64>,
}

async fn cleanup_logs(
    State(state): State<AppState>,
    Query(q): Query<CleanupQuery>,
) -> Json<Value> {
    let days = q.days.filter(|d| *d > 0).unwrap_or(DEFAULT_CLEANUP_DAYS);
    let deleted = state.call_log.cleanup_older_than(days, Utc::now());
    tracing::info!(target: "api", days, deleted, "call log cleanup");
    Json(json!({
        "success": true,
        "message": format!("Cleaned up {deleted} old API logs"),
        "deletedCount": deleted,
    }))
}

fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn image_ref(url: Option<&str>, b64: Option<&str>) -> Result<Option<ImageRef>, ApiError> {
    if let Some(data) = b64.map(str::trim).filter(|s| !s.is_empty()) {
        // accept data URLs as well as bare base64
        let payload = data.split_once(";base64,").map_or(data, |(_, p)| p);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| ApiError::BadRequest(format!("imageBase64 is not valid base64: {e}")))?;
        return Ok(Some(ImageRef::Bytes(bytes)));
    }
    Ok(url
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ImageRef::parse))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::rank;
    use crate::recognition::VisualMatch;

    #[test]
    fn item_ids_accept_strings_and_numbers() {
        assert_eq!(id_string(&json!(42)).as_deref(), Some("42"));
        assert_eq!(id_string(&json!(" a-1 ")).as_deref(), Some("a-1"));
        assert_eq!(id_string(&json!("  ")), None);
        assert_eq!(id_string(&json!(null)), None);
    }

    #[test]
    fn base64_image_wins_over_url() {
        let r = image_ref(Some("https://x/a.jpg"), Some("data:image/png;base64,AQID")).unwrap();
        assert_eq!(r, Some(ImageRef::Bytes(vec![1, 2, 3])));
        assert!(image_ref(None, Some("%%%")).is_err());
        assert_eq!(image_ref(Some(" "), None).unwrap(), None);
    }

    #[test]
    fn similar_items_report_similarity_percent() {
        let set = rank(
            &[VisualMatch {
                url: "https://v.example/1".into(),
                title: Some("Twin".into()),
                score: 0.876,
            }],
            &[],
            15,
        );
        let items = similar_items(&set);
        assert_eq!(items[0].similarity, Some(88));
        assert_eq!(items[0].match_type, "visual_match");
    }
}
