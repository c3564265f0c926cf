//! Persistence seam: where sealed batches leave the pipeline.
//!
//! [`RecordSink`] is implemented by the transactional `PostgreSQL` sink and
//! by [`MemorySink`], the in-process double used by tests and dry runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use siphon_types::batch::Batch;
use siphon_types::error::IngestError;
use siphon_types::record::FieldValue;

/// A destination that commits whole batches atomically.
#[async_trait]
pub trait RecordSink: Send {
    /// Persist every record in the batch in a single transaction.
    ///
    /// On error, nothing from the batch may remain visible in the store.
    ///
    /// # Errors
    ///
    /// Returns a commit or connection error; retryable errors are retried
    /// by the owning writer with backoff.
    async fn write_batch(&mut self, batch: &Batch) -> Result<(), IngestError>;

    /// Repair the sink between retry attempts (reconnect, etc.).
    ///
    /// # Errors
    ///
    /// Returns a connection error if repair fails; the writer logs it and
    /// lets the next write attempt consume the retry budget.
    async fn recover(&mut self) -> Result<(), IngestError> {
        Ok(())
    }
}

/// Connects one sink per writer shard.
#[async_trait]
pub trait SinkFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns a connection or auth error; the coordinator retries
    /// retryable failures up to the connection retry limit.
    async fn connect(&self, shard: usize) -> Result<Box<dyn RecordSink>, IngestError>;
}

// ---------------------------------------------------------------------------
// In-memory sink
// ---------------------------------------------------------------------------

/// In-memory [`RecordSink`] with scriptable failures.
///
/// Clones share state: use one clone as the [`SinkFactory`] and keep another
/// to inspect committed rows afterwards.
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    rows: Mutex<Vec<Vec<Option<FieldValue>>>>,
    batches: AtomicU64,
    scripted_failures: Mutex<VecDeque<IngestError>>,
    write_delay: Mutex<Option<Duration>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue errors to be returned by the next `write_batch` calls, in order.
    pub fn fail_next_writes(&self, errors: impl IntoIterator<Item = IngestError>) {
        if let Ok(mut scripted) = self.state.scripted_failures.lock() {
            scripted.extend(errors);
        }
    }

    /// Delay every successful write, to simulate a slow store.
    pub fn set_write_delay(&self, delay: Duration) {
        if let Ok(mut slot) = self.state.write_delay.lock() {
            *slot = Some(delay);
        }
    }

    /// All committed rows, across every shard, in commit order.
    pub fn rows(&self) -> Vec<Vec<Option<FieldValue>>> {
        self.state.rows.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn batch_count(&self) -> u64 {
        self.state.batches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn write_batch(&mut self, batch: &Batch) -> Result<(), IngestError> {
        let scripted = self
            .state
            .scripted_failures
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front());
        if let Some(err) = scripted {
            return Err(err);
        }

        let delay = self.state.write_delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut rows = self.state.rows.lock().map_err(|_| {
            IngestError::internal("MEMORY_SINK_POISONED", "memory sink lock poisoned")
        })?;
        rows.extend(batch.records.iter().map(|r| r.values.clone()));
        self.state.batches.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl SinkFactory for MemorySink {
    async fn connect(&self, _shard: usize) -> Result<Box<dyn RecordSink>, IngestError> {
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_types::batch::WorkItem;
    use siphon_types::record::{DeliveryTag, Record};

    fn batch(tags: &[u64]) -> Batch {
        let mut b = Batch::with_capacity(tags.len(), 0);
        for &t in tags {
            b.push(WorkItem {
                record: Record::new(vec![Some(FieldValue::Integer(t as i64))]),
                tag: DeliveryTag(t),
            });
        }
        b
    }

    #[tokio::test]
    async fn commits_rows_in_order() {
        let sink = MemorySink::new();
        let mut writer = sink.connect(0).await.unwrap();
        writer.write_batch(&batch(&[1, 2])).await.unwrap();
        writer.write_batch(&batch(&[3])).await.unwrap();
        assert_eq!(sink.rows().len(), 3);
        assert_eq!(sink.batch_count(), 2);
    }

    #[tokio::test]
    async fn scripted_failures_fire_in_order_then_clear() {
        let sink = MemorySink::new();
        sink.fail_next_writes([
            IngestError::commit("COMMIT_FAILED", "deadlock"),
            IngestError::connection("CONN_RESET", "reset"),
        ]);
        let mut writer = sink.connect(0).await.unwrap();

        let err = writer.write_batch(&batch(&[1])).await.unwrap_err();
        assert_eq!(err.code, "COMMIT_FAILED");
        let err = writer.write_batch(&batch(&[1])).await.unwrap_err();
        assert_eq!(err.code, "CONN_RESET");
        writer.write_batch(&batch(&[1])).await.unwrap();
        assert_eq!(sink.rows().len(), 1);
    }
}
