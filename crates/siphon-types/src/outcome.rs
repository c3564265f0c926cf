//! Quarantine envelope for records that left the pipeline without committing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCategory, IngestError};
use crate::record::DeliveryTag;

/// Pipeline stage at which a record was quarantined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineStage {
    Decode,
    Persist,
}

/// A record routed to the quarantine log instead of the store.
///
/// `content` holds a payload snippet for decode failures and the serialized
/// record for persistence failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub tag: DeliveryTag,
    pub stage: QuarantineStage,
    pub content: String,
    pub error_category: ErrorCategory,
    pub error_code: String,
    pub error_message: String,
    pub failed_at: DateTime<Utc>,
}

impl QuarantineRecord {
    pub fn new(
        tag: DeliveryTag,
        stage: QuarantineStage,
        content: impl Into<String>,
        error: &IngestError,
    ) -> Self {
        Self {
            tag,
            stage,
            content: content.into(),
            error_category: error.category,
            error_code: error.code.clone(),
            error_message: error.message.clone(),
            failed_at: Utc::now(),
        }
    }
}
