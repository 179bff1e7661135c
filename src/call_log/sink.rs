// src/call_log/sink.rs
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use super::{ApiCallRecord, CallLogSink};

/// Query filter for [`MemoryLogSink::query`].
#[derive(Debug, Clone, Default)]
pub struct CallLogFilter {
    pub provider_name: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Per-provider call counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStats {
    pub provider_name: String,
    pub total_calls: usize,
    pub successful_calls: usize,
    pub failed_calls: usize,
    pub last_call: Option<DateTime<Utc>>,
}

/// Bounded in-memory log; oldest records are evicted past `cap`.
#[derive(Debug)]
pub struct MemoryLogSink {
    inner: Mutex<Vec<ApiCallRecord>>,
    cap: usize,
}

impl MemoryLogSink {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 100_000);
        Self {
            inner: Mutex::new(Vec::with_capacity(cap.min(1024))),
            cap,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Matching records, newest first.
    pub fn query(&self, filter: &CallLogFilter) -> Vec<ApiCallRecord> {
        let v = self.lock();
        let mut out: Vec<ApiCallRecord> = v
            .iter()
            .rev()
            .filter(|r| {
                filter
                    .provider_name
                    .as_deref()
                    .is_none_or(|p| r.provider_name == p)
            })
            .filter(|r| filter.since.is_none_or(|t| r.timestamp >= t))
            .filter(|r| filter.until.is_none_or(|t| r.timestamp <= t))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        out
    }

    /// Call counts grouped by provider, ordered by provider name.
    pub fn stats(&self) -> Vec<ProviderStats> {
        let v = self.lock();
        let mut by_provider: BTreeMap<&str, ProviderStats> = BTreeMap::new();
        for r in v.iter() {
            let entry = by_provider
                .entry(r.provider_name.as_str())
                .or_insert_with(|| ProviderStats {
                    provider_name: r.provider_name.clone(),
                    total_calls: 0,
                    successful_calls: 0,
                    failed_calls: 0,
                    last_call: None,
                });
            entry.total_calls += 1;
            if r.is_success() {
                entry.successful_calls += 1;
            } else {
                entry.failed_calls += 1;
            }
            entry.last_call = Some(entry.last_call.map_or(r.timestamp, |t| t.max(r.timestamp)));
        }
        by_provider.into_values().collect()
    }

    /// Drop records older than `days` relative to `now`. Returns the number removed.
    pub fn cleanup_older_than(&self, days: i64, now: DateTime<Utc>) -> usize {
        let cutoff = now - ChronoDuration::days(days.max(0));
        let mut v = self.lock();
        let before = v.len();
        v.retain(|r| r.timestamp >= cutoff);
        before - v.len()
    }

    fn push(&self, record: ApiCallRecord) {
        let mut v = self.lock();
        v.push(record);
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ApiCallRecord>> {
        // A poisoned log is still a valid log.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait::async_trait]
impl CallLogSink for MemoryLogSink {
    async fn append(&self, record: ApiCallRecord) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

/// Appends one JSON object per line.
#[derive(Debug, Clone)]
pub struct JsonlFileSink {
    path: PathBuf,
}

impl JsonlFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl CallLogSink for JsonlFileSink {
    async fn append(&self, record: ApiCallRecord) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
        }
        let mut line = serde_json::to_string(&record).context("serializing api call record")?;
        line.push('\n');
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening {}", self.path.display()))?;
        f.write_all(line.as_bytes())
            .await
            .with_context(|| format!("appending to {}", self.path.display()))?;
        Ok(())
    }
}

/// Writes every record to each inner sink; reports the first failure after trying all.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn CallLogSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn CallLogSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait::async_trait]
impl CallLogSink for FanoutSink {
    async fn append(&self, record: ApiCallRecord) -> Result<()> {
        let mut first_err = None;
        for s in &self.sinks {
            if let Err(e) = s.append(record.clone()).await {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
