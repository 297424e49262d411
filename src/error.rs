//! Custom error types for scopusviz.
//!
//! This module defines all error types used throughout the application.
//! All functions return `Result<T, ScopusError>` instead of using `unwrap()`.

use crate::record::ResultSet;
use thiserror::Error;

/// Main error type for scopusviz operations.
///
/// The first four variants mirror how a Scopus fetch can fail; the rest cover
/// local I/O and (de)serialization.
#[derive(Debug, Error)]
pub enum ScopusError {
    /// Missing, invalid or unauthorized API key (HTTP 401/403)
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Request quota exhausted (HTTP 429)
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Malformed search equation or unexpected response schema.
    /// The API's message is carried verbatim.
    #[error("Query error: {0}")]
    Query(String),

    /// Network failure, timeout or server-side error; the caller may retry
    #[error("Transient error: {0}")]
    Transient(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV serialization/deserialization error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl ScopusError {
    /// Whether re-invoking the same fetch may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScopusError::Transient(_))
    }
}

impl From<reqwest::Error> for ScopusError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ScopusError::Query(format!("Unreadable response body: {}", err))
        } else {
            ScopusError::Transient(err.to_string())
        }
    }
}

/// A paged fetch that stopped on an API error.
///
/// Holds whatever was collected before the failure so callers can still
/// inspect or display the partial result.
#[derive(Debug, Error)]
#[error("Fetch aborted after {} records: {error}", .partial.len())]
pub struct FetchAborted {
    /// Records collected before the failing page
    pub partial: ResultSet,
    /// The error that stopped the fetch
    #[source]
    pub error: ScopusError,
}

/// Result type alias using `ScopusError`
pub type Result<T> = std::result::Result<T, ScopusError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a query (schema) error message
    fn ok_or_schema(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_schema(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| ScopusError::Query(format!("Schema mismatch: {}", msg)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ScopusError::Transient("timeout".into()).is_retryable());
        assert!(!ScopusError::Auth("bad key".into()).is_retryable());
        assert!(!ScopusError::QuotaExceeded("429".into()).is_retryable());
        assert!(!ScopusError::Query("bad".into()).is_retryable());
    }

    #[test]
    fn test_ok_or_schema() {
        let missing: Option<u32> = None;
        let err = missing.ok_or_schema("dc:identifier").unwrap_err();
        assert!(matches!(err, ScopusError::Query(ref m) if m.contains("dc:identifier")));
    }

    #[test]
    fn test_fetch_aborted_display() {
        let aborted = FetchAborted {
            partial: ResultSet::new(),
            error: ScopusError::Auth("Invalid API Key".into()),
        };
        let msg = aborted.to_string();
        assert!(msg.contains("0 records"));
        assert!(msg.contains("Invalid API Key"));
    }
}
