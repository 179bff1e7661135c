// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod call_log;
pub mod config;
pub mod error;
pub mod keywords;
pub mod marketplace;
pub mod metrics;
pub mod pipeline;
pub mod ranking;
pub mod recognition;
pub mod stats;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::AppConfig;
pub use crate::error::PipelineError;
pub use crate::pipeline::{AnalysisOutcome, AnalysisRequest, Pipeline, PipelineSettings};
