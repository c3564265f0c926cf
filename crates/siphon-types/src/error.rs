//! Structured error model for ingestion operations.
//!
//! [`IngestError`] carries classification, retry metadata, and optional
//! diagnostic details. Construct via category-specific factory methods.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of an ingestion error.
///
/// Determines default retry behavior and operator-facing categorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid pipeline configuration.
    Config,
    /// Authentication failure against broker or store.
    Auth,
    /// Broker or database connection failure (retryable).
    Connection,
    /// Transaction commit failure at the store (retryable).
    Commit,
    /// Malformed or schema-violating document.
    Decode,
    /// Bounded queue admission timed out (retryable).
    Backpressure,
    /// Internal pipeline error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Auth => "auth",
            Self::Connection => "connection",
            Self::Commit => "commit",
            Self::Decode => "decode",
            Self::Backpressure => "backpressure",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Blast radius of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorScope {
    /// Affects the entire run.
    Run,
    /// Affects a single batch.
    Batch,
    /// Affects an individual record.
    Record,
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Run => "run",
            Self::Batch => "batch",
            Self::Record => "record",
        };
        f.write_str(s)
    }
}

/// Retry backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffClass {
    /// Millisecond-scale retry.
    Fast,
    /// Second-scale retry.
    Normal,
    /// Minute-scale retry.
    Slow,
}

/// Transaction commit state at the time of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitState {
    /// Error occurred before any commit attempt.
    BeforeCommit,
    /// Commit was attempted but outcome is unknown.
    AfterCommitUnknown,
}

/// Structured error from an ingestion operation.
///
/// Carries classification, retry metadata, and optional diagnostic details.
/// Construct via category-specific factory methods (e.g., [`IngestError::config`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct IngestError {
    pub category: ErrorCategory,
    pub scope: ErrorScope,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    pub backoff_class: BackoffClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_state: Option<CommitState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IngestError {
    fn new(
        category: ErrorCategory,
        scope: ErrorScope,
        retryable: bool,
        backoff_class: BackoffClass,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            scope,
            code: code.into(),
            message: message.into(),
            retryable,
            retry_after_ms: None,
            backoff_class,
            commit_state: None,
            details: None,
        }
    }

    /// Configuration error (not retryable).
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, ErrorScope::Run, false, BackoffClass::Normal, code, message)
    }

    /// Authentication error (not retryable).
    #[must_use]
    pub fn auth(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Auth, ErrorScope::Run, false, BackoffClass::Normal, code, message)
    }

    /// Broker or store connection error (retryable, normal backoff).
    #[must_use]
    pub fn connection(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Connection,
            ErrorScope::Run,
            true,
            BackoffClass::Normal,
            code,
            message,
        )
    }

    /// Transaction commit error (retryable, normal backoff, batch scope).
    #[must_use]
    pub fn commit(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Commit,
            ErrorScope::Batch,
            true,
            BackoffClass::Normal,
            code,
            message,
        )
    }

    /// Document decode error (not retryable, record scope).
    #[must_use]
    pub fn decode(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Decode,
            ErrorScope::Record,
            false,
            BackoffClass::Normal,
            code,
            message,
        )
    }

    /// Queue admission timeout (retryable, fast backoff).
    #[must_use]
    pub fn backpressure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Backpressure,
            ErrorScope::Run,
            true,
            BackoffClass::Fast,
            code,
            message,
        )
    }

    /// Internal pipeline error (not retryable).
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, ErrorScope::Run, false, BackoffClass::Normal, code, message)
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Record transaction commit state at time of error.
    #[must_use]
    pub fn with_commit_state(mut self, state: CommitState) -> Self {
        self.commit_state = Some(state);
        self
    }

    /// Override the default error scope.
    #[must_use]
    pub fn with_scope(mut self, scope: ErrorScope) -> Self {
        self.scope = scope;
        self
    }

    /// Override the default backoff class.
    #[must_use]
    pub fn with_backoff_class(mut self, class: BackoffClass) -> Self {
        self.backoff_class = class;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_defaults() {
        let err = IngestError::config("MISSING_HOST", "host is required");
        assert_eq!(err.category, ErrorCategory::Config);
        assert_eq!(err.scope, ErrorScope::Run);
        assert!(!err.retryable);
        assert_eq!(err.backoff_class, BackoffClass::Normal);
    }

    #[test]
    fn connection_and_commit_are_retryable() {
        let conn = IngestError::connection("CONN_RESET", "connection reset by peer");
        assert!(conn.retryable);
        assert_eq!(conn.scope, ErrorScope::Run);

        let commit = IngestError::commit("COMMIT_FAILED", "deadlock");
        assert!(commit.retryable);
        assert_eq!(commit.scope, ErrorScope::Batch);
    }

    #[test]
    fn decode_error_is_record_scoped_and_final() {
        let err = IngestError::decode("MALFORMED_XML", "unexpected end of document");
        assert_eq!(err.scope, ErrorScope::Record);
        assert!(!err.retryable);
    }

    #[test]
    fn backpressure_uses_fast_backoff() {
        let err = IngestError::backpressure("QUEUE_FULL", "enqueue timed out");
        assert!(err.retryable);
        assert_eq!(err.backoff_class, BackoffClass::Fast);
    }

    #[test]
    fn serde_roundtrip() {
        let err = IngestError::commit("COMMIT_FAILED", "timeout")
            .with_commit_state(CommitState::AfterCommitUnknown)
            .with_details(serde_json::json!({"table": "records"}));
        let json = serde_json::to_string(&err).unwrap();
        let back: IngestError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }

    #[test]
    fn display_format() {
        let err = IngestError::config("BAD_PORT", "port must be positive");
        assert_eq!(err.to_string(), "[config] BAD_PORT: port must be positive");
    }
}
