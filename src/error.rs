//! Error types shared across the estimation pipeline.
//!
//! Only [`PipelineError`] ever reaches a caller. Recognition and marketplace
//! failures are recovered where they happen and survive only as call-log
//! status labels.

use thiserror::Error;

/// Caller-visible pipeline failure. Everything else degrades to a partial result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// Nothing to search for, or the request itself is unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Failure of a single marketplace source call.
#[derive(Debug, Error)]
pub enum SourceError {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Source answered with a non-success status code.
    #[error("unexpected status {0}")]
    Status(u16),

    /// No answer within the allotted time.
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// Response did not match the listing contract.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Credentials missing or rejected.
    #[error("auth failure: {0}")]
    Auth(String),
}

impl SourceError {
    /// Status label written to the call log for this failure.
    pub fn status_label(&self) -> String {
        match self {
            SourceError::Http(e) => e
                .status()
                .map(|s| s.as_u16().to_string())
                .unwrap_or_else(|| "error".to_string()),
            SourceError::Status(code) => code.to_string(),
            SourceError::Timeout(_) => "timeout".to_string(),
            SourceError::Malformed(_) | SourceError::Auth(_) => "error".to_string(),
        }
    }
}

/// Failure inside the recognition adapter. Never leaves the adapter.
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("recognition credentials are not configured")]
    MissingCredentials,

    #[error("image unavailable: {0}")]
    Image(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {0}")]
    Status(u16),

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl RecognitionError {
    pub fn status_label(&self) -> String {
        match self {
            RecognitionError::Status(code) => code.to_string(),
            RecognitionError::Http(e) => e
                .status()
                .map(|s| s.as_u16().to_string())
                .unwrap_or_else(|| "error".to_string()),
            _ => "error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_labels_match_call_log_vocabulary() {
        assert_eq!(SourceError::Status(503).status_label(), "503");
        assert_eq!(SourceError::Timeout(250).status_label(), "timeout");
        assert_eq!(
            SourceError::Malformed("price".into()).status_label(),
            "error"
        );
        assert_eq!(SourceError::Auth("no key".into()).status_label(), "error");
    }

    #[test]
    fn pipeline_error_displays_reason() {
        let e = PipelineError::InvalidInput("no keywords".into());
        assert_eq!(e.to_string(), "invalid input: no keywords");
    }
}
