//! Configuration surface for an ingestion run.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use siphon_types::schema::RecordSchema;

/// Top-level ingestion configuration, parsed from YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Run name used in logs and summaries.
    pub pipeline: String,
    pub source: SourceConfig,
    pub store: StoreConfig,
    pub schema: RecordSchema,
    #[serde(default)]
    pub tuning: PipelineTuning,
    #[serde(default)]
    pub limits: RunLimits,
    /// JSONL quarantine destination; omit for log-only quarantine.
    #[serde(default)]
    pub quarantine_path: Option<PathBuf>,
}

/// Where raw documents come from.
///
/// External broker transports plug in behind the `TopicConsumer` trait and
/// carry their own connection settings; the built-in kinds cover replay
/// and load generation.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Newline-delimited XML file, one document per line.
    Replay { path: PathBuf },
    /// Generated documents matching the schema.
    Synthetic {
        records: u64,
        /// Emit one malformed document every N records.
        #[serde(default)]
        malformed_every: Option<u64>,
    },
}

/// PostgreSQL connection and target table settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    pub table: String,
}

fn default_port() -> u16 {
    5432
}

fn default_schema() -> String {
    "public".to_string()
}

impl StoreConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            self.host, self.port, self.user, self.password, self.database
        )
    }
}

/// Pipeline sizing knobs. Every field has a production-reasonable default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineTuning {
    /// Records per sealed batch.
    pub batch_size: usize,
    /// Longest a record may wait in an unsealed batch.
    pub batch_max_wait_ms: u64,
    /// Bounded work queue capacity, in records.
    pub queue_capacity: usize,
    /// Decode pool size; 0 means one per available core.
    pub decode_concurrency: usize,
    /// Number of persistence writers, each with its own connection.
    pub write_concurrency: usize,
    /// Queue admission timeout before a stall is logged.
    pub enqueue_timeout_ms: u64,
    /// Connection attempts before the run fails to start.
    pub connection_retry_limit: u32,
    /// Commit retries per batch before quarantine.
    pub commit_retry_limit: u32,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            batch_max_wait_ms: 200,
            queue_capacity: 4000,
            decode_concurrency: 0,
            write_concurrency: 2,
            enqueue_timeout_ms: 30_000,
            connection_retry_limit: 5,
            commit_retry_limit: 3,
        }
    }
}

impl PipelineTuning {
    pub fn batch_max_wait(&self) -> Duration {
        Duration::from_millis(self.batch_max_wait_ms)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    /// Decode pool size with the 0-means-cores default applied.
    pub fn effective_decode_concurrency(&self) -> usize {
        if self.decode_concurrency > 0 {
            return self.decode_concurrency;
        }
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1)
    }
}

/// Stop conditions for a run. Absent limits mean run until the stream ends.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunLimits {
    pub max_records: Option<u64>,
    pub max_duration_secs: Option<u64>,
}

impl RunLimits {
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }
}
