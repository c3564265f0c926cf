//! Ingestion coordinator: owns the run lifecycle and wires the stages.
//!
//! A run moves through `Idle -> Connecting -> Running -> Draining ->
//! Stopped`. Connecting establishes one store connection per writer with
//! retry and backoff. Running pumps deliveries from the topic through the
//! decode pool into the bounded queue. Draining lets everything already in
//! flight reach a terminal outcome before the summary is assembled; no
//! stage is torn down while it still holds records.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use siphon_types::batch::WorkItem;
use siphon_types::outcome::{QuarantineRecord, QuarantineStage};
use siphon_types::schema::RecordSchema;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::batcher::{self, BatchPolicy, BatcherSummary};
use crate::broker::{DeliveryAcker, TopicConsumer};
use crate::config::{PipelineTuning, RunLimits};
use crate::decoder;
use crate::errors::{compute_backoff, EngineError};
use crate::progress::{self, ProgressCounters};
use crate::quarantine::QuarantineLog;
use crate::queue::{self, WorkSender};
use crate::result::{RunCounts, RunResult, WriterSummary};
use crate::sink::{RecordSink, SinkFactory};
use crate::writer::{self, WriterContext};

/// Batches a writer may have waiting ahead of the one it is committing.
const WRITER_CHANNEL_CAPACITY: usize = 2;
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Lifecycle states of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Connecting,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Why the Running state ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    StreamEnded,
    RecordLimit,
    DurationLimit,
    Signal,
    Fault,
}

/// Everything a run needs: the external collaborators plus shared state.
pub struct IngestHarness {
    pub schema: Arc<RecordSchema>,
    pub consumer: Box<dyn TopicConsumer>,
    pub acker: Arc<dyn DeliveryAcker>,
    pub sinks: Arc<dyn SinkFactory>,
    pub counters: Arc<ProgressCounters>,
    pub quarantine: Arc<QuarantineLog>,
}

fn transition(from: CoordinatorState, to: CoordinatorState) -> CoordinatorState {
    tracing::info!(from = %from, to = %to, "Coordinator state change");
    to
}

/// Run an ingestion to completion.
///
/// Returns once every dispatched record has reached a terminal outcome
/// (committed and acknowledged, or quarantined). `stop` is the operator
/// stop signal; flipping it to `true` starts an orderly drain.
///
/// # Errors
///
/// Returns an error if connections cannot be established within the retry
/// budget, if the queue stalls past its limit, or on infrastructure
/// failures (task panics, settlement errors, quarantine IO).
pub async fn run_ingest(
    mut harness: IngestHarness,
    tuning: &PipelineTuning,
    limits: &RunLimits,
    stop: watch::Receiver<bool>,
) -> Result<RunResult, EngineError> {
    let start = Instant::now();
    let mut state = transition(CoordinatorState::Idle, CoordinatorState::Connecting);

    let sinks = connect_sinks(harness.sinks.as_ref(), tuning).await?;
    state = transition(state, CoordinatorState::Running);

    let (work_tx, work_rx) = queue::bounded(
        tuning.queue_capacity,
        tuning.enqueue_timeout(),
        tuning.connection_retry_limit,
    );

    let mut writer_set: JoinSet<Result<WriterSummary, EngineError>> = JoinSet::new();
    let mut shard_txs = Vec::with_capacity(sinks.len());
    for (shard, sink) in sinks.into_iter().enumerate() {
        let (tx, rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        shard_txs.push(tx);
        let ctx = WriterContext {
            shard,
            acker: harness.acker.clone(),
            counters: harness.counters.clone(),
            quarantine: harness.quarantine.clone(),
            commit_retry_limit: tuning.commit_retry_limit,
        };
        writer_set.spawn(writer::run_writer(ctx, rx, sink));
    }

    let policy = BatchPolicy {
        batch_size: tuning.batch_size,
        max_wait: tuning.batch_max_wait(),
    };
    let batcher_handle = tokio::spawn(batcher::run_batcher(work_rx, policy, shard_txs));
    let progress_task = tokio::spawn(progress::log_progress(
        harness.counters.clone(),
        PROGRESS_LOG_INTERVAL,
    ));

    let mut pump = Pump {
        harness: &mut harness,
        work_tx,
        decode_pool: Arc::new(Semaphore::new(tuning.effective_decode_concurrency())),
        decode_tasks: JoinSet::new(),
        first_error: None,
    };
    let stop_reason = pump.run(limits, stop).await;
    tracing::info!(reason = ?stop_reason, "Ingestion pump stopped");

    state = transition(state, CoordinatorState::Draining);
    pump.drain().await;
    let Pump {
        work_tx,
        mut first_error,
        ..
    } = pump;
    // Closing the queue cascades: batcher flushes and exits, writer
    // channels close, writers drain their pending batches.
    drop(work_tx);

    let batcher_summary = join_batcher(batcher_handle, &mut first_error).await;
    let writers = join_writers(writer_set, &mut first_error).await;
    progress_task.abort();

    transition(state, CoordinatorState::Stopped);
    harness.quarantine.flush()?;

    if let Some(err) = first_error {
        return Err(err);
    }

    let snap = harness.counters.snapshot();
    let duration_secs = start.elapsed().as_secs_f64();
    let result = RunResult {
        counts: RunCounts {
            attempted: snap.attempted,
            succeeded: snap.succeeded,
            failed: snap.failed,
            batches_committed: snap.batches_committed,
            batches_quarantined: snap.batches_quarantined,
            commit_retries: snap.commit_retries,
        },
        batches_sealed: batcher_summary.batches_sealed,
        writers,
        duration_secs,
        records_per_sec: if duration_secs > 0.0 {
            snap.succeeded as f64 / duration_secs
        } else {
            0.0
        },
        quarantined: harness.quarantine.entry_count(),
    };
    tracing::info!(
        attempted = result.counts.attempted,
        succeeded = result.counts.succeeded,
        failed = result.counts.failed,
        records_per_sec = format!("{:.0}", result.records_per_sec),
        "Ingestion run completed"
    );
    Ok(result)
}

/// Establish one store connection per writer shard, with retry and backoff.
async fn connect_sinks(
    factory: &dyn SinkFactory,
    tuning: &PipelineTuning,
) -> Result<Vec<Box<dyn RecordSink>>, EngineError> {
    let mut sinks = Vec::with_capacity(tuning.write_concurrency);
    for shard in 0..tuning.write_concurrency {
        let mut attempt = 0u32;
        let sink = loop {
            attempt += 1;
            match factory.connect(shard).await {
                Ok(sink) => break sink,
                Err(err) if err.retryable && attempt < tuning.connection_retry_limit => {
                    let delay = compute_backoff(&err, attempt);
                    tracing::warn!(
                        shard,
                        attempt,
                        connection_retry_limit = tuning.connection_retry_limit,
                        delay_ms = delay.as_millis() as u64,
                        category = %err.category,
                        code = err.code,
                        "Store connection failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::error!(
                        shard,
                        attempts = attempt,
                        category = %err.category,
                        code = err.code,
                        "Store connection failed permanently"
                    );
                    return Err(EngineError::Ingest(err));
                }
            }
        };
        sinks.push(sink);
    }
    tracing::info!(writers = sinks.len(), "Store connections established");
    Ok(sinks)
}

/// The Running-state delivery pump.
struct Pump<'a> {
    harness: &'a mut IngestHarness,
    work_tx: WorkSender,
    decode_pool: Arc<Semaphore>,
    decode_tasks: JoinSet<Result<(), EngineError>>,
    first_error: Option<EngineError>,
}

impl Pump<'_> {
    async fn run(&mut self, limits: &RunLimits, mut stop: watch::Receiver<bool>) -> StopReason {
        // A year out stands in for "no deadline".
        let deadline = limits
            .max_duration()
            .map_or_else(|| Instant::now() + Duration::from_secs(86_400 * 365), |d| {
                Instant::now() + d
            });
        let mut stop_open = true;
        let mut dispatched = 0u64;

        loop {
            if limits.max_records.is_some_and(|max| dispatched >= max) {
                return StopReason::RecordLimit;
            }

            tokio::select! {
                changed = stop.changed(), if stop_open => {
                    match changed {
                        Ok(()) => {
                            if *stop.borrow_and_update() {
                                return StopReason::Signal;
                            }
                        }
                        // Signal source gone; keep running without it.
                        Err(_) => stop_open = false,
                    }
                }
                () = tokio::time::sleep_until(deadline) => {
                    return StopReason::DurationLimit;
                }
                Some(joined) = self.decode_tasks.join_next(), if !self.decode_tasks.is_empty() => {
                    if !self.observe_decode_result(joined) {
                        return StopReason::Fault;
                    }
                }
                msg = self.harness.consumer.recv() => {
                    let Some(raw) = msg else {
                        return StopReason::StreamEnded;
                    };
                    dispatched += 1;
                    if !self.dispatch(raw).await {
                        return StopReason::Fault;
                    }
                }
            }
        }
    }

    /// Hand one delivery to the decode pool. Returns `false` on fault.
    async fn dispatch(&mut self, raw: siphon_types::record::RawMessage) -> bool {
        self.harness.counters.record_dispatched();
        let permit = match self.decode_pool.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                self.first_error = Some(EngineError::Infrastructure(anyhow::anyhow!(
                    "decode pool closed: {e}"
                )));
                return false;
            }
        };

        let schema = self.harness.schema.clone();
        let sender = self.work_tx.clone();
        let acker = self.harness.acker.clone();
        let counters = self.harness.counters.clone();
        let quarantine = self.harness.quarantine.clone();
        self.decode_tasks.spawn(async move {
            let _permit = permit;
            match decoder::decode(&schema, &raw.payload) {
                Ok(record) => sender
                    .enqueue(WorkItem {
                        record,
                        tag: raw.tag,
                    })
                    .await
                    .map_err(EngineError::from),
                Err(err) => {
                    quarantine.append(&QuarantineRecord::new(
                        raw.tag,
                        QuarantineStage::Decode,
                        decoder::payload_snippet(&raw.payload),
                        &err,
                    ))?;
                    // Malformed input is consumed, not left for redelivery.
                    acker.ack(&[raw.tag]).await?;
                    counters.record_failed(1);
                    Ok(())
                }
            }
        });
        true
    }

    fn observe_decode_result(
        &mut self,
        joined: Result<Result<(), EngineError>, tokio::task::JoinError>,
    ) -> bool {
        match joined {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                tracing::error!("Decode stage failed: {err}");
                if self.first_error.is_none() {
                    self.first_error = Some(err);
                }
                false
            }
            Err(join_err) => {
                if self.first_error.is_none() {
                    self.first_error = Some(EngineError::Infrastructure(anyhow::anyhow!(
                        "decode task panicked: {join_err}"
                    )));
                }
                false
            }
        }
    }

    /// Wait for every outstanding decode task.
    async fn drain(&mut self) {
        while let Some(joined) = self.decode_tasks.join_next().await {
            self.observe_decode_result(joined);
        }
    }
}

async fn join_batcher(
    handle: tokio::task::JoinHandle<Result<BatcherSummary, EngineError>>,
    first_error: &mut Option<EngineError>,
) -> BatcherSummary {
    match handle.await {
        Ok(Ok(summary)) => summary,
        Ok(Err(err)) => {
            if first_error.is_none() {
                *first_error = Some(err);
            }
            BatcherSummary::default()
        }
        Err(join_err) => {
            if first_error.is_none() {
                *first_error = Some(EngineError::Infrastructure(anyhow::anyhow!(
                    "batcher task panicked: {join_err}"
                )));
            }
            BatcherSummary::default()
        }
    }
}

async fn join_writers(
    mut writer_set: JoinSet<Result<WriterSummary, EngineError>>,
    first_error: &mut Option<EngineError>,
) -> Vec<WriterSummary> {
    let mut writers = Vec::new();
    while let Some(joined) = writer_set.join_next().await {
        match joined {
            Ok(Ok(summary)) => writers.push(summary),
            Ok(Err(err)) => {
                tracing::error!("Writer failed: {err}");
                if first_error.is_none() {
                    *first_error = Some(err);
                }
            }
            Err(join_err) => {
                if first_error.is_none() {
                    *first_error = Some(EngineError::Infrastructure(anyhow::anyhow!(
                        "writer task panicked: {join_err}"
                    )));
                }
            }
        }
    }
    writers.sort_by_key(|w| w.shard);
    writers
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use siphon_types::error::IngestError;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyFactory {
        failures_before_success: AtomicU32,
        inner: crate::sink::MemorySink,
    }

    #[async_trait]
    impl SinkFactory for FlakyFactory {
        async fn connect(&self, shard: usize) -> Result<Box<dyn RecordSink>, IngestError> {
            let remaining = self.failures_before_success.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_before_success.store(remaining - 1, Ordering::SeqCst);
                return Err(IngestError::connection("CONNECTION_FAILED", "refused"));
            }
            self.inner.connect(shard).await
        }
    }

    fn tuning(connection_retry_limit: u32) -> PipelineTuning {
        PipelineTuning {
            write_concurrency: 1,
            connection_retry_limit,
            ..PipelineTuning::default()
        }
    }

    #[test]
    fn state_display_names() {
        assert_eq!(CoordinatorState::Idle.to_string(), "idle");
        assert_eq!(CoordinatorState::Draining.to_string(), "draining");
    }

    #[tokio::test(start_paused = true)]
    async fn connect_retries_until_success() {
        let factory = FlakyFactory {
            failures_before_success: AtomicU32::new(2),
            inner: crate::sink::MemorySink::new(),
        };
        let sinks = connect_sinks(&factory, &tuning(5)).await.unwrap();
        assert_eq!(sinks.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_fails_after_retry_budget() {
        let factory = FlakyFactory {
            failures_before_success: AtomicU32::new(10),
            inner: crate::sink::MemorySink::new(),
        };
        let err = connect_sinks(&factory, &tuning(3)).await.err().unwrap();
        assert!(matches!(err, EngineError::Ingest(_)));
    }

    #[tokio::test]
    async fn auth_error_is_not_retried() {
        struct AuthFailFactory {
            calls: AtomicU32,
        }
        #[async_trait]
        impl SinkFactory for AuthFailFactory {
            async fn connect(&self, _shard: usize) -> Result<Box<dyn RecordSink>, IngestError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(IngestError::auth("AUTH_FAILED", "bad password"))
            }
        }
        let factory = AuthFailFactory {
            calls: AtomicU32::new(0),
        };
        let err = connect_sinks(&factory, &tuning(5)).await.err().unwrap();
        assert!(matches!(err, EngineError::Ingest(_)));
        assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
    }
}
