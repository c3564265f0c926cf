//! Persistence writer: one task per shard, one store connection each.
//!
//! Pulls sealed batches off its channel and drives each through
//! write-retry-quarantine. A batch either commits and is acknowledged, or
//! exhausts its retry budget and is quarantined and rejected. The writer
//! never reorders batches within its shard.

use std::sync::Arc;
use std::time::Instant;

use siphon_types::batch::Batch;
use siphon_types::outcome::{QuarantineRecord, QuarantineStage};
use tokio::sync::mpsc;

use crate::broker::DeliveryAcker;
use crate::errors::{compute_backoff, EngineError};
use crate::progress::ProgressCounters;
use crate::quarantine::QuarantineLog;
use crate::result::WriterSummary;
use crate::sink::RecordSink;

pub struct WriterContext {
    pub shard: usize,
    pub acker: Arc<dyn DeliveryAcker>,
    pub counters: Arc<ProgressCounters>,
    pub quarantine: Arc<QuarantineLog>,
    pub commit_retry_limit: u32,
}

/// Run one writer until its batch channel closes.
///
/// # Errors
///
/// Returns an error if acknowledgement or quarantine IO fails; batch write
/// failures themselves are absorbed into retries and quarantine.
pub async fn run_writer(
    ctx: WriterContext,
    mut rx: mpsc::Receiver<Batch>,
    mut sink: Box<dyn RecordSink>,
) -> Result<WriterSummary, EngineError> {
    let mut summary = WriterSummary {
        shard: ctx.shard,
        ..WriterSummary::default()
    };

    while let Some(batch) = rx.recv().await {
        write_one_batch(&ctx, &mut sink, &batch, &mut summary).await?;
    }

    tracing::debug!(
        shard = ctx.shard,
        batches = summary.batches_committed,
        records = summary.records_written,
        "Writer drained"
    );
    Ok(summary)
}

async fn write_one_batch(
    ctx: &WriterContext,
    sink: &mut Box<dyn RecordSink>,
    batch: &Batch,
    summary: &mut WriterSummary,
) -> Result<(), EngineError> {
    let n = batch.len() as u64;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let write_start = Instant::now();
        let outcome = sink.write_batch(batch).await;
        summary.flush_secs += write_start.elapsed().as_secs_f64();

        match outcome {
            Ok(()) => {
                ctx.acker.ack(&batch.tags).await?;
                ctx.counters.record_succeeded(n);
                ctx.counters.record_batch_committed();
                summary.batches_committed += 1;
                summary.records_written += n;
                return Ok(());
            }
            Err(err) if err.retryable && attempt <= ctx.commit_retry_limit => {
                let delay = compute_backoff(&err, attempt);
                tracing::warn!(
                    shard = ctx.shard,
                    attempt,
                    commit_retry_limit = ctx.commit_retry_limit,
                    delay_ms = delay.as_millis() as u64,
                    category = %err.category,
                    code = err.code,
                    commit_state = ?err.commit_state,
                    "Batch write failed, will retry"
                );
                ctx.counters.record_commit_retry();
                summary.commit_retries += 1;
                tokio::time::sleep(delay).await;
                if let Err(recover_err) = sink.recover().await {
                    tracing::warn!(
                        shard = ctx.shard,
                        code = recover_err.code,
                        "Sink recovery failed: {}",
                        recover_err.message
                    );
                }
            }
            Err(err) => {
                tracing::error!(
                    shard = ctx.shard,
                    attempts = attempt,
                    records = n,
                    category = %err.category,
                    code = err.code,
                    "Batch failed terminally, quarantining"
                );
                for (record, tag) in batch.records.iter().zip(&batch.tags) {
                    let content = serde_json::to_string(record)
                        .unwrap_or_else(|_| "<unserializable record>".to_string());
                    ctx.quarantine.append(&QuarantineRecord::new(
                        *tag,
                        QuarantineStage::Persist,
                        content,
                        &err,
                    ))?;
                }
                ctx.acker.nack(&batch.tags).await?;
                ctx.counters.record_failed(n);
                ctx.counters.record_batch_quarantined();
                summary.batches_quarantined += 1;
                summary.records_failed += n;
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InProcessTopic;
    use crate::sink::{MemorySink, SinkFactory};
    use siphon_types::batch::WorkItem;
    use siphon_types::error::IngestError;
    use siphon_types::record::{DeliveryTag, FieldValue, Record};

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

    struct Harness {
        ctx_topic: InProcessTopic,
        sink: MemorySink,
        counters: Arc<ProgressCounters>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                ctx_topic: InProcessTopic::bounded(8, true),
                sink: MemorySink::new(),
                counters: Arc::new(ProgressCounters::new()),
            }
        }

        fn ctx(&self, commit_retry_limit: u32) -> WriterContext {
            WriterContext {
                shard: 0,
                acker: self.ctx_topic.ledger.clone(),
                counters: self.counters.clone(),
                quarantine: Arc::new(QuarantineLog::disabled()),
                commit_retry_limit,
            }
        }
    }

    #[tokio::test]
    async fn commits_and_acks_batches() {
        let h = Harness::new();
        let (tx, rx) = mpsc::channel(4);
        tx.send(batch(&[1, 2, 3])).await.unwrap();
        drop(tx);

        for _ in 0..3 {
            h.counters.record_dispatched();
        }
        let sink = h.sink.connect(0).await.unwrap();
        let summary = run_writer(h.ctx(3), rx, sink).await.unwrap();

        assert_eq!(summary.batches_committed, 1);
        assert_eq!(summary.records_written, 3);
        assert_eq!(h.sink.rows().len(), 3);
        assert_eq!(h.ctx_topic.ledger.acked_count(), 3);
        assert!(h.ctx_topic.ledger.is_acked(DeliveryTag(2)));
        assert_eq!(h.counters.snapshot().succeeded, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_then_commits() {
        let h = Harness::new();
        h.sink.fail_next_writes([
            IngestError::commit("COMMIT_FAILED", "deadlock"),
            IngestError::connection("CONN_RESET", "reset"),
        ]);
        let (tx, rx) = mpsc::channel(4);
        tx.send(batch(&[1, 2])).await.unwrap();
        drop(tx);

        for _ in 0..2 {
            h.counters.record_dispatched();
        }
        let sink = h.sink.connect(0).await.unwrap();
        let summary = run_writer(h.ctx(3), rx, sink).await.unwrap();

        assert_eq!(summary.commit_retries, 2);
        assert_eq!(summary.batches_committed, 1);
        assert_eq!(summary.batches_quarantined, 0);
        // Exactly once: rows land a single time despite two retries.
        assert_eq!(h.sink.rows().len(), 2);
        assert_eq!(h.ctx_topic.ledger.acked_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn quarantines_and_nacks_after_retry_budget() {
        let h = Harness::new();
        h.sink.fail_next_writes(
            (0..4).map(|_| IngestError::commit("COMMIT_FAILED", "still down")),
        );
        let (tx, rx) = mpsc::channel(4);
        tx.send(batch(&[7, 8])).await.unwrap();
        drop(tx);

        for _ in 0..2 {
            h.counters.record_dispatched();
        }
        let dir = tempfile::tempdir().unwrap();
        let qpath = dir.path().join("q.jsonl");
        let mut ctx = h.ctx(2);
        ctx.quarantine = Arc::new(QuarantineLog::open(&qpath).unwrap());

        let sink = h.sink.connect(0).await.unwrap();
        let summary = run_writer(ctx, rx, sink).await.unwrap();

        assert_eq!(summary.batches_quarantined, 1);
        assert_eq!(summary.records_failed, 2);
        assert!(h.sink.rows().is_empty());
        assert_eq!(h.ctx_topic.ledger.nacked_count(), 2);
        assert!(h.ctx_topic.ledger.is_nacked(DeliveryTag(7)));
        let snap = h.counters.snapshot();
        assert_eq!(snap.failed, 2);
        assert_eq!(snap.batches_quarantined, 1);
    }

    #[tokio::test]
    async fn non_retryable_failure_skips_retries() {
        let h = Harness::new();
        h.sink
            .fail_next_writes([IngestError::internal("BROKEN", "no retry")]);
        let (tx, rx) = mpsc::channel(4);
        tx.send(batch(&[1])).await.unwrap();
        drop(tx);

        h.counters.record_dispatched();
        let sink = h.sink.connect(0).await.unwrap();
        let summary = run_writer(h.ctx(5), rx, sink).await.unwrap();

        assert_eq!(summary.commit_retries, 0);
        assert_eq!(summary.batches_quarantined, 1);
    }
}
