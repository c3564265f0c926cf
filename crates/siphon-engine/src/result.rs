//! Run summary types returned by the coordinator.

use serde::Serialize;

/// Record-level totals for a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub batches_committed: u64,
    pub batches_quarantined: u64,
    pub commit_retries: u64,
}

/// Per-writer totals and timing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WriterSummary {
    pub shard: usize,
    pub batches_committed: u64,
    pub batches_quarantined: u64,
    pub records_written: u64,
    pub records_failed: u64,
    pub commit_retries: u64,
    /// Wall time spent inside `write_batch`, including retries.
    pub flush_secs: f64,
}

/// Final summary of an ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub counts: RunCounts,
    pub batches_sealed: u64,
    pub writers: Vec<WriterSummary>,
    pub duration_secs: f64,
    pub records_per_sec: f64,
    pub quarantined: u64,
}

impl RunResult {
    /// Every dispatched record reached a terminal outcome.
    pub fn is_balanced(&self) -> bool {
        self.counts.attempted == self.counts.succeeded + self.counts.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_run_accounting() {
        let result = RunResult {
            counts: RunCounts {
                attempted: 10,
                succeeded: 8,
                failed: 2,
                ..RunCounts::default()
            },
            batches_sealed: 2,
            writers: vec![],
            duration_secs: 1.0,
            records_per_sec: 8.0,
            quarantined: 2,
        };
        assert!(result.is_balanced());
    }
}
