//! Run-wide progress counters.
//!
//! Plain atomics, updated from every stage and read by the periodic
//! throughput logger and the final run summary. `attempted` counts
//! dispatched deliveries; every one of them eventually lands in either
//! `succeeded` or `failed`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct ProgressCounters {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    inflight: AtomicU64,
    batches_committed: AtomicU64,
    batches_quarantined: AtomicU64,
    commit_retries: AtomicU64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub inflight: u64,
    pub batches_committed: u64,
    pub batches_quarantined: u64,
    pub commit_retries: u64,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// One delivery entered the pipeline.
    pub fn record_dispatched(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
        self.inflight.fetch_add(1, Ordering::Relaxed);
    }

    /// `n` records committed and acknowledged.
    pub fn record_succeeded(&self, n: u64) {
        self.succeeded.fetch_add(n, Ordering::Relaxed);
        self.inflight.fetch_sub(n, Ordering::Relaxed);
    }

    /// `n` records quarantined.
    pub fn record_failed(&self, n: u64) {
        self.failed.fetch_add(n, Ordering::Relaxed);
        self.inflight.fetch_sub(n, Ordering::Relaxed);
    }

    pub fn record_batch_committed(&self) {
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_quarantined(&self) {
        self.batches_quarantined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit_retry(&self) {
        self.commit_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            attempted: self.attempted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            inflight: self.inflight.load(Ordering::Relaxed),
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            batches_quarantined: self.batches_quarantined.load(Ordering::Relaxed),
            commit_retries: self.commit_retries.load(Ordering::Relaxed),
        }
    }
}

/// Log a throughput line every `interval` until aborted.
///
/// Spawned by the coordinator for the duration of the Running state.
pub async fn log_progress(counters: std::sync::Arc<ProgressCounters>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;
    let mut last_succeeded = 0u64;
    loop {
        ticker.tick().await;
        let snap = counters.snapshot();
        let rate = (snap.succeeded - last_succeeded) as f64 / interval.as_secs_f64();
        last_succeeded = snap.succeeded;
        tracing::info!(
            attempted = snap.attempted,
            succeeded = snap.succeeded,
            failed = snap.failed,
            inflight = snap.inflight,
            records_per_sec = format!("{rate:.0}"),
            "Ingestion progress"
        );
    }
}
