// src/call_log/mod.rs
//! Best-effort record of every external call (recognition provider, marketplaces).
//!
//! `CallLogger::record` only pushes onto a bounded queue; a background task drains
//! the queue into a [`CallLogSink`]. A full queue or a failing sink is reported on
//! the `call_log` tracing target and otherwise ignored, so pipeline results never
//! depend on logging.

pub mod sink;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

pub use sink::{CallLogFilter, FanoutSink, JsonlFileSink, MemoryLogSink, ProviderStats};

/// One external call attempt, successful or not. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCallRecord {
    pub provider_name: String,
    pub request_url: String,
    /// HTTP status code as text, or a sentinel such as `"error"` / `"timeout"`.
    pub status_label: String,
    pub timestamp: DateTime<Utc>,
}

impl ApiCallRecord {
    pub fn new(provider_name: &str, request_url: &str, status_label: &str) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            request_url: redact_url(request_url),
            status_label: status_label.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_label.starts_with('2') || self.status_label == "success"
    }
}

/// Destination for drained call records.
#[async_trait::async_trait]
pub trait CallLogSink: Send + Sync {
    async fn append(&self, record: ApiCallRecord) -> anyhow::Result<()>;
}

/// Cheap, cloneable handle; safe to use from any number of concurrent tasks.
#[derive(Clone, Debug)]
pub struct CallLogger {
    tx: Option<mpsc::Sender<ApiCallRecord>>,
}

impl CallLogger {
    /// Start the drain task. Must be called inside a Tokio runtime.
    pub fn spawn(sink: Arc<dyn CallLogSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<ApiCallRecord>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let provider = record.provider_name.clone();
                if let Err(e) = sink.append(record).await {
                    tracing::warn!(target: "call_log", error = ?e, %provider, "failed to persist api call record");
                }
            }
            tracing::debug!(target: "call_log", "call log drain finished");
        });
        (Self { tx: Some(tx) }, handle)
    }

    /// Logger that drops every record.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Fire-and-forget. Never blocks, never fails.
    pub fn record(&self, provider_name: &str, request_url: &str, status_label: &str) {
        let Some(tx) = &self.tx else {
            return;
        };
        let record = ApiCallRecord::new(provider_name, request_url, status_label);
        match tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(r)) => {
                counter!("call_log_dropped_total").increment(1);
                tracing::warn!(target: "call_log", provider = %r.provider_name, "call log queue full; record dropped");
            }
            Err(TrySendError::Closed(r)) => {
                counter!("call_log_dropped_total").increment(1);
                tracing::debug!(target: "call_log", provider = %r.provider_name, "call log closed; record dropped");
            }
        }
    }
}

/// Mask credentials passed as query parameters (`key=`, `api_key=`, `token=`).
pub fn redact_url(url: &str) -> String {
    static RE_SECRET: OnceCell<Regex> = OnceCell::new();
    let re = RE_SECRET.get_or_init(|| {
        Regex::new(r"(?i)([?&](?:key|api_key|apikey|token|access_token)=)[^&#]*")
            .expect("static redaction regex")
    });
    re.replace_all(url, "${1}***").into_owned()
}
