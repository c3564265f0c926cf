//! Decoded record model and broker delivery identities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Broker-assigned identity of one delivered message.
///
/// Tags are opaque to the pipeline; they are carried next to the decoded
/// record and handed back to the broker on acknowledge or reject.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DeliveryTag(pub u64);

/// A raw message as delivered by the broker, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub payload: Vec<u8>,
    pub tag: DeliveryTag,
}

/// A single decoded field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
}

/// One decoded record: positional values matching the schema field order.
///
/// `None` entries are absent optional fields and persist as SQL NULL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub values: Vec<Option<FieldValue>>,
}

impl Record {
    pub fn new(values: Vec<Option<FieldValue>>) -> Self {
        Self { values }
    }
}
