//! Engine error model and retry backoff policy helpers.

use std::time::Duration;

use siphon_types::error::{BackoffClass, IngestError};

const BACKOFF_FAST_BASE_MS: u64 = 100;
const BACKOFF_NORMAL_BASE_MS: u64 = 1_000;
const BACKOFF_SLOW_BASE_MS: u64 = 5_000;
const BACKOFF_MAX_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// EngineError — categorised errors for retry decisions
// ---------------------------------------------------------------------------

/// Categorized engine error for retry decisions.
///
/// `Ingest` wraps a typed `IngestError` with retry metadata (`retryable`,
/// `backoff_class`, `retry_after_ms`, etc.).
///
/// `Infrastructure` wraps opaque runtime errors (task panics, closed
/// channels, quarantine log IO, etc.) that are never retryable.
#[derive(Debug)]
pub enum EngineError {
    /// Typed ingestion error with retry metadata.
    Ingest(IngestError),
    /// Infrastructure error (task join, channel, quarantine IO, etc.)
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ingest(e) => write!(f, "{}", e),
            Self::Infrastructure(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<IngestError> for EngineError {
    fn from(e: IngestError) -> Self {
        Self::Ingest(e)
    }
}

impl EngineError {
    /// Returns `true` if this is a typed ingestion error marked retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ingest(e) => e.retryable,
            Self::Infrastructure(_) => false,
        }
    }

    /// Returns the typed ingestion error if this is an `Ingest` variant.
    pub fn as_ingest_error(&self) -> Option<&IngestError> {
        match self {
            Self::Ingest(e) => Some(e),
            Self::Infrastructure(_) => None,
        }
    }
}

/// Compute retry delay based on error hints and attempt number.
pub(crate) fn compute_backoff(err: &IngestError, attempt: u32) -> Duration {
    // If the error carries an explicit retry_after, use it
    if let Some(ms) = err.retry_after_ms {
        return Duration::from_millis(ms);
    }

    // Exponential backoff based on backoff_class
    let base_ms: u64 = match err.backoff_class {
        BackoffClass::Fast => BACKOFF_FAST_BASE_MS,
        BackoffClass::Normal => BACKOFF_NORMAL_BASE_MS,
        BackoffClass::Slow => BACKOFF_SLOW_BASE_MS,
    };

    let delay_ms = base_ms.saturating_mul(2u64.pow(attempt.saturating_sub(1)));
    Duration::from_millis(delay_ms.min(BACKOFF_MAX_MS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_types::error::ErrorCategory;

    #[test]
    fn test_engine_error_ingest_is_retryable() {
        let err = EngineError::Ingest(IngestError::connection(
            "CONN_RESET",
            "connection reset by peer",
        ));
        assert!(err.is_retryable());
        let ie = err.as_ingest_error().unwrap();
        assert_eq!(ie.category, ErrorCategory::Connection);
        assert_eq!(ie.backoff_class, BackoffClass::Normal);
    }

    #[test]
    fn test_engine_error_ingest_not_retryable() {
        let err = EngineError::Ingest(IngestError::config("MISSING_HOST", "host is required"));
        assert!(!err.is_retryable());
        let ie = err.as_ingest_error().unwrap();
        assert_eq!(ie.category, ErrorCategory::Config);
    }

    #[test]
    fn test_engine_error_infrastructure_not_retryable() {
        let err = EngineError::Infrastructure(anyhow::anyhow!("batcher task panicked"));
        assert!(!err.is_retryable());
        assert!(err.as_ingest_error().is_none());
    }

    #[test]
    fn test_engine_error_from_anyhow() {
        let anyhow_err = anyhow::anyhow!("something went wrong");
        let ee: EngineError = anyhow_err.into();
        assert!(matches!(ee, EngineError::Infrastructure(_)));
        assert!(!ee.is_retryable());
    }

    #[test]
    fn test_engine_error_display_ingest() {
        let err = EngineError::Ingest(IngestError::backpressure("QUEUE_FULL", "enqueue timed out"));
        let msg = format!("{}", err);
        assert!(msg.contains("backpressure"));
        assert!(msg.contains("QUEUE_FULL"));
        assert!(msg.contains("enqueue timed out"));
    }

    #[test]
    fn test_backoff_fast() {
        let err = IngestError::backpressure("X", "y");
        assert_eq!(compute_backoff(&err, 1), Duration::from_millis(100));
        assert_eq!(compute_backoff(&err, 2), Duration::from_millis(200));
        assert_eq!(compute_backoff(&err, 3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_normal() {
        let err = IngestError::connection("X", "y");
        assert_eq!(compute_backoff(&err, 1), Duration::from_millis(1000));
        assert_eq!(compute_backoff(&err, 2), Duration::from_millis(2000));
    }

    #[test]
    fn test_backoff_slow() {
        let err = IngestError::connection("X", "y").with_backoff_class(BackoffClass::Slow);
        assert_eq!(compute_backoff(&err, 1), Duration::from_millis(5000));
        assert_eq!(compute_backoff(&err, 2), Duration::from_millis(10000));
    }

    #[test]
    fn test_backoff_respects_retry_after() {
        let mut err = IngestError::commit("X", "y");
        err.retry_after_ms = Some(7500);
        assert_eq!(compute_backoff(&err, 1), Duration::from_millis(7500));
        assert_eq!(compute_backoff(&err, 5), Duration::from_millis(7500));
    }

    #[test]
    fn test_backoff_capped_at_60s() {
        let err = IngestError::commit("X", "y");
        assert_eq!(compute_backoff(&err, 20), Duration::from_millis(60_000));
    }
}
