//! Batch accumulator: seals queue items into batches by size or age.
//!
//! A single task drains the work queue, seals a batch when it reaches
//! `batch_size` records or when `max_wait` has elapsed since the batch's
//! first record, and dispatches sealed batches round-robin across the
//! per-writer channels. Records never wait indefinitely: a partial batch is
//! flushed on timeout and on shutdown.

use std::time::Duration;

use siphon_types::batch::Batch;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::errors::EngineError;
use crate::queue::WorkReceiver;

/// Sealing policy for the accumulator.
#[derive(Debug, Clone, Copy)]
pub struct BatchPolicy {
    pub batch_size: usize,
    /// Longest a record may sit in an unsealed batch.
    pub max_wait: Duration,
}

/// Totals reported by the accumulator after the queue closes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatcherSummary {
    pub batches_sealed: u64,
    pub records_batched: u64,
}

/// Run the accumulator until the queue closes and drains.
///
/// # Errors
///
/// Returns an infrastructure error if a writer channel closes while the
/// accumulator still holds records for it.
pub async fn run_batcher(
    mut rx: WorkReceiver,
    policy: BatchPolicy,
    shards: Vec<mpsc::Sender<Batch>>,
) -> Result<BatcherSummary, EngineError> {
    debug_assert!(!shards.is_empty());
    let batch_size = policy.batch_size.max(1);
    let mut summary = BatcherSummary::default();
    let mut next_shard = 0usize;
    let mut closed = false;

    while !closed {
        // Block for the first record; its arrival starts the age clock.
        let Some(first) = rx.recv().await else {
            break;
        };
        let deadline = Instant::now() + policy.max_wait;
        let mut batch = Batch::with_capacity(batch_size, next_shard);
        batch.push(first);

        while batch.len() < batch_size {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(item)) => batch.push(item),
                Ok(None) => {
                    closed = true;
                    break;
                }
                // Age limit reached: seal the partial batch.
                Err(_) => break,
            }
        }

        tracing::debug!(
            shard = next_shard,
            records = batch.len(),
            full = batch.len() == batch_size,
            "Sealed batch"
        );
        summary.batches_sealed += 1;
        summary.records_batched += batch.len() as u64;

        shards[next_shard].send(batch).await.map_err(|_| {
            EngineError::Infrastructure(anyhow::anyhow!(
                "writer channel {next_shard} closed while batches pending"
            ))
        })?;
        next_shard = (next_shard + 1) % shards.len();
    }

    tracing::debug!(
        batches = summary.batches_sealed,
        records = summary.records_batched,
        "Batch accumulator drained"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;
    use siphon_types::batch::WorkItem;
    use siphon_types::record::{DeliveryTag, Record};

    fn item(tag: u64) -> WorkItem {
        WorkItem {
            record: Record::new(vec![None]),
            tag: DeliveryTag(tag),
        }
    }

    fn policy(batch_size: usize, max_wait_ms: u64) -> BatchPolicy {
        BatchPolicy {
            batch_size,
            max_wait: Duration::from_millis(max_wait_ms),
        }
    }

    #[tokio::test]
    async fn seals_full_batches_at_size() {
        let (tx, rx) = queue::bounded(64, Duration::from_secs(1), 3);
        let (batch_tx, mut batch_rx) = mpsc::channel(8);

        for i in 0..6 {
            tx.enqueue(item(i)).await.unwrap();
        }
        drop(tx);

        let summary = run_batcher(rx, policy(3, 10_000), vec![batch_tx])
            .await
            .unwrap();
        assert_eq!(summary.batches_sealed, 2);
        assert_eq!(summary.records_batched, 6);

        let first = batch_rx.recv().await.unwrap();
        assert_eq!(first.tags, vec![DeliveryTag(0), DeliveryTag(1), DeliveryTag(2)]);
        let second = batch_rx.recv().await.unwrap();
        assert_eq!(second.tags, vec![DeliveryTag(3), DeliveryTag(4), DeliveryTag(5)]);
    }

    #[tokio::test]
    async fn flushes_partial_batch_after_max_wait() {
        let (tx, rx) = queue::bounded(64, Duration::from_secs(1), 3);
        let (batch_tx, mut batch_rx) = mpsc::channel(8);

        tx.enqueue(item(0)).await.unwrap();
        tx.enqueue(item(1)).await.unwrap();

        let batcher = tokio::spawn(run_batcher(rx, policy(100, 50), vec![batch_tx]));

        let sealed = batch_rx.recv().await.unwrap();
        assert_eq!(sealed.len(), 2);

        drop(tx);
        batcher.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn flushes_partial_batch_on_close() {
        let (tx, rx) = queue::bounded(64, Duration::from_secs(1), 3);
        let (batch_tx, mut batch_rx) = mpsc::channel(8);

        tx.enqueue(item(7)).await.unwrap();
        drop(tx);

        let summary = run_batcher(rx, policy(100, 60_000), vec![batch_tx])
            .await
            .unwrap();
        assert_eq!(summary.batches_sealed, 1);
        let sealed = batch_rx.recv().await.unwrap();
        assert_eq!(sealed.tags, vec![DeliveryTag(7)]);
    }

    #[tokio::test]
    async fn dispatches_round_robin_across_shards() {
        let (tx, rx) = queue::bounded(64, Duration::from_secs(1), 3);
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);

        for i in 0..4 {
            tx.enqueue(item(i)).await.unwrap();
        }
        drop(tx);

        run_batcher(rx, policy(2, 10_000), vec![tx_a, tx_b])
            .await
            .unwrap();

        let a = rx_a.recv().await.unwrap();
        assert_eq!(a.shard, 0);
        assert_eq!(a.tags, vec![DeliveryTag(0), DeliveryTag(1)]);
        let b = rx_b.recv().await.unwrap();
        assert_eq!(b.shard, 1);
        assert_eq!(b.tags, vec![DeliveryTag(2), DeliveryTag(3)]);
    }

    #[tokio::test]
    async fn empty_queue_produces_no_batches() {
        let (tx, rx) = queue::bounded(8, Duration::from_secs(1), 3);
        let (batch_tx, _batch_rx) = mpsc::channel(8);
        drop(tx);
        let summary = run_batcher(rx, policy(10, 100), vec![batch_tx])
            .await
            .unwrap();
        assert_eq!(summary, BatcherSummary::default());
    }
}
