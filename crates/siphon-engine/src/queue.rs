//! Bounded work queue between the decode pool and the batch accumulator.
//!
//! Admission blocks when the queue is full; a producer that cannot enqueue
//! within the configured timeout logs and retries, and gives up with a
//! backpressure error once the stall limit is reached.

use std::time::Duration;

use siphon_types::batch::WorkItem;
use siphon_types::error::IngestError;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

/// Create a bounded queue with the given capacity and admission policy.
pub fn bounded(
    capacity: usize,
    enqueue_timeout: Duration,
    max_stalls: u32,
) -> (WorkSender, WorkReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        WorkSender {
            tx,
            enqueue_timeout,
            max_stalls: max_stalls.max(1),
        },
        WorkReceiver { rx },
    )
}

/// Producer handle. Cloned into each decode task.
#[derive(Clone)]
pub struct WorkSender {
    tx: mpsc::Sender<WorkItem>,
    enqueue_timeout: Duration,
    max_stalls: u32,
}

impl WorkSender {
    /// Enqueue one decoded record, blocking while the queue is full.
    ///
    /// Each admission timeout is logged and retried. After `max_stalls`
    /// consecutive timeouts the queue is considered permanently stuck.
    ///
    /// # Errors
    ///
    /// Returns a backpressure error when the stall limit is reached, or an
    /// internal error if the consumer side has shut down.
    pub async fn enqueue(&self, item: WorkItem) -> Result<(), IngestError> {
        let mut item = item;
        for stall in 1..=self.max_stalls {
            match self.tx.send_timeout(item, self.enqueue_timeout).await {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => {
                    tracing::warn!(
                        stall,
                        max_stalls = self.max_stalls,
                        timeout_ms = self.enqueue_timeout.as_millis() as u64,
                        "Work queue full, enqueue timed out"
                    );
                    item = returned;
                }
                Err(SendTimeoutError::Closed(_)) => {
                    return Err(IngestError::internal(
                        "QUEUE_CLOSED",
                        "work queue consumer has shut down",
                    ));
                }
            }
        }
        Err(IngestError::backpressure(
            "QUEUE_STALLED",
            format!(
                "work queue admission timed out {} consecutive times",
                self.max_stalls
            ),
        ))
    }
}

/// Consumer handle, owned by the batch accumulator.
pub struct WorkReceiver {
    rx: mpsc::Receiver<WorkItem>,
}

impl WorkReceiver {
    /// Receive the next item. Returns `None` once every sender is dropped
    /// and the queue has fully drained.
    pub async fn recv(&mut self) -> Option<WorkItem> {
        self.rx.recv().await
    }
}
