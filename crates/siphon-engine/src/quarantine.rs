//! Append-only quarantine log.
//!
//! Records that fail decoding, or batches that exhaust their commit retry
//! budget, are appended as JSON lines. With no path configured the log
//! degrades to structured warnings only.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use siphon_types::error::IngestError;
use siphon_types::outcome::QuarantineRecord;

#[derive(Debug)]
pub struct QuarantineLog {
    sink: Option<Mutex<BufWriter<File>>>,
    path: Option<PathBuf>,
    entries: AtomicU64,
}

impl QuarantineLog {
    /// Open (or create) a JSONL quarantine file in append mode.
    ///
    /// # Errors
    ///
    /// Returns a config error if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                IngestError::config(
                    "QUARANTINE_OPEN_FAILED",
                    format!("cannot open quarantine log '{}': {e}", path.display()),
                )
            })?;
        Ok(Self {
            sink: Some(Mutex::new(BufWriter::new(file))),
            path: Some(path.to_path_buf()),
            entries: AtomicU64::new(0),
        })
    }

    /// Log-only quarantine with no file backing.
    pub fn disabled() -> Self {
        Self {
            sink: None,
            path: None,
            entries: AtomicU64::new(0),
        }
    }

    /// Append one quarantined record and emit a warning.
    ///
    /// # Errors
    ///
    /// Returns an internal error if serialization or the file write fails.
    pub fn append(&self, record: &QuarantineRecord) -> Result<(), IngestError> {
        tracing::warn!(
            tag = record.tag.0,
            stage = ?record.stage,
            category = %record.error_category,
            code = record.error_code,
            "Record quarantined: {}",
            record.error_message
        );
        self.entries.fetch_add(1, Ordering::Relaxed);

        let Some(sink) = &self.sink else {
            return Ok(());
        };
        let line = serde_json::to_string(record).map_err(|e| {
            IngestError::internal(
                "QUARANTINE_ENCODE_FAILED",
                format!("cannot serialize quarantine record: {e}"),
            )
        })?;
        let mut writer = sink
            .lock()
            .map_err(|_| IngestError::internal("QUARANTINE_POISONED", "quarantine lock poisoned"))?;
        writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.write_all(b"\n"))
            .map_err(|e| {
                IngestError::internal(
                    "QUARANTINE_WRITE_FAILED",
                    format!("cannot append quarantine record: {e}"),
                )
            })
    }

    /// Flush buffered entries to disk. Called once at run finalization.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the flush fails.
    pub fn flush(&self) -> Result<(), IngestError> {
        let Some(sink) = &self.sink else {
            return Ok(());
        };
        let mut writer = sink
            .lock()
            .map_err(|_| IngestError::internal("QUARANTINE_POISONED", "quarantine lock poisoned"))?;
        writer.flush().map_err(|e| {
            IngestError::internal(
                "QUARANTINE_FLUSH_FAILED",
                format!("cannot flush quarantine log: {e}"),
            )
        })
    }

    /// Number of records appended during this run.
    pub fn entry_count(&self) -> u64 {
        self.entries.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
