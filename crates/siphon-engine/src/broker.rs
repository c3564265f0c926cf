//! Broker seam: topic consumption and delivery acknowledgement.
//!
//! The engine never talks to a broker client directly. It pulls
//! [`RawMessage`]s from a [`TopicConsumer`] and settles them through a
//! [`DeliveryAcker`]; embedders supply implementations for their transport.
//! [`InProcessTopic`] is the built-in implementation backing file replay,
//! the synthetic generator, and the test suite.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use siphon_types::error::IngestError;
use siphon_types::record::{DeliveryTag, RawMessage};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

/// Pull side of a topic subscription.
#[async_trait]
pub trait TopicConsumer: Send {
    /// Receive the next delivery, or `None` when the subscription ends.
    ///
    /// Implementations must be cancellation safe: a `recv` future dropped
    /// before completion must not lose a delivery.
    async fn recv(&mut self) -> Option<RawMessage>;
}

/// Settlement side of a topic subscription.
///
/// Shared across writer tasks; acknowledgements for different batches may
/// arrive concurrently and out of order.
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    /// Acknowledge committed deliveries.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the broker rejects the settlement.
    async fn ack(&self, tags: &[DeliveryTag]) -> Result<(), IngestError>;

    /// Reject deliveries that terminally failed.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the broker rejects the settlement.
    async fn nack(&self, tags: &[DeliveryTag]) -> Result<(), IngestError>;
}

// ---------------------------------------------------------------------------
// In-process topic
// ---------------------------------------------------------------------------

/// A bounded in-process topic with a settlement ledger.
pub struct InProcessTopic {
    pub publisher: TopicPublisher,
    pub consumer: InProcessConsumer,
    pub ledger: Arc<DeliveryLedger>,
}

impl InProcessTopic {
    /// Create a topic with the given channel capacity.
    ///
    /// `recording` ledgers retain every settled tag for inspection; plain
    /// ledgers only count, which is what long runs want.
    pub fn bounded(capacity: usize, recording: bool) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let ledger = Arc::new(DeliveryLedger::new(recording));
        Self {
            publisher: TopicPublisher {
                tx,
                next_tag: AtomicU64::new(1),
            },
            consumer: InProcessConsumer { rx },
            ledger,
        }
    }
}

/// Publishing handle for an [`InProcessTopic`].
pub struct TopicPublisher {
    tx: mpsc::Sender<RawMessage>,
    next_tag: AtomicU64,
}

impl TopicPublisher {
    /// Publish one payload, blocking while the topic buffer is full.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the consumer side is gone.
    pub async fn publish(&self, payload: Vec<u8>) -> Result<DeliveryTag, IngestError> {
        let tag = DeliveryTag(self.next_tag.fetch_add(1, Ordering::Relaxed));
        self.tx
            .send(RawMessage { payload, tag })
            .await
            .map_err(|_| {
                IngestError::internal("TOPIC_CLOSED", "in-process topic consumer has shut down")
            })?;
        Ok(tag)
    }
}

/// Consuming handle for an [`InProcessTopic`].
pub struct InProcessConsumer {
    rx: mpsc::Receiver<RawMessage>,
}

#[async_trait]
impl TopicConsumer for InProcessConsumer {
    async fn recv(&mut self) -> Option<RawMessage> {
        self.rx.recv().await
    }
}

/// Settlement bookkeeping for the in-process topic.
pub struct DeliveryLedger {
    acked: AtomicU64,
    nacked: AtomicU64,
    recorded: Option<Mutex<RecordedTags>>,
}

#[derive(Default)]
struct RecordedTags {
    acked: BTreeSet<DeliveryTag>,
    nacked: BTreeSet<DeliveryTag>,
}

impl DeliveryLedger {
    /// Standalone ledger, for sources that settle without a broker.
    pub fn new(recording: bool) -> Self {
        Self {
            acked: AtomicU64::new(0),
            nacked: AtomicU64::new(0),
            recorded: recording.then(|| Mutex::new(RecordedTags::default())),
        }
    }

    pub fn acked_count(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    pub fn nacked_count(&self) -> u64 {
        self.nacked.load(Ordering::Relaxed)
    }

    /// Whether `tag` was acknowledged. Recording ledgers only.
    pub fn is_acked(&self, tag: DeliveryTag) -> bool {
        self.recorded
            .as_ref()
            .and_then(|m| m.lock().ok().map(|r| r.acked.contains(&tag)))
            .unwrap_or(false)
    }

    /// Whether `tag` was rejected. Recording ledgers only.
    pub fn is_nacked(&self, tag: DeliveryTag) -> bool {
        self.recorded
            .as_ref()
            .and_then(|m| m.lock().ok().map(|r| r.nacked.contains(&tag)))
            .unwrap_or(false)
    }

    fn record(&self, tags: &[DeliveryTag], ack: bool) -> Result<(), IngestError> {
        let counter = if ack { &self.acked } else { &self.nacked };
        counter.fetch_add(tags.len() as u64, Ordering::Relaxed);
        if let Some(recorded) = &self.recorded {
            let mut guard = recorded.lock().map_err(|_| {
                IngestError::internal("LEDGER_POISONED", "delivery ledger lock poisoned")
            })?;
            let set = if ack {
                &mut guard.acked
            } else {
                &mut guard.nacked
            };
            set.extend(tags.iter().copied());
        }
        Ok(())
    }
}

#[async_trait]
impl DeliveryAcker for DeliveryLedger {
    async fn ack(&self, tags: &[DeliveryTag]) -> Result<(), IngestError> {
        self.record(tags, true)
    }

    async fn nack(&self, tags: &[DeliveryTag]) -> Result<(), IngestError> {
        self.record(tags, false)
    }
}

// ---------------------------------------------------------------------------
// File replay
// ---------------------------------------------------------------------------

/// Publish a newline-delimited XML file into a topic, one document per line.
///
/// Blank lines are skipped. Returns the number of documents published.
///
/// # Errors
///
/// Returns a config error if the file cannot be opened, an internal error
/// if the topic closed mid-replay.
pub async fn replay_file(path: &Path, publisher: &TopicPublisher) -> Result<u64, IngestError> {
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        IngestError::config(
            "REPLAY_OPEN_FAILED",
            format!("cannot open replay file '{}': {e}", path.display()),
        )
    })?;
    let mut lines = tokio::io::BufReader::new(file).lines();
    let mut published = 0u64;
    loop {
        let line = lines.next_line().await.map_err(|e| {
            IngestError::internal(
                "REPLAY_READ_FAILED",
                format!("read error in '{}': {e}", path.display()),
            )
        })?;
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        publisher.publish(line.into_bytes()).await?;
        published += 1;
    }
    tracing::info!(file = %path.display(), published, "Replay complete");
    Ok(published)
}
