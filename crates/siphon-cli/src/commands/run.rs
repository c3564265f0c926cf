use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;

use siphon_engine::broker::{replay_file, DeliveryLedger, InProcessTopic, TopicConsumer};
use siphon_engine::config::{parse_config, validate_config, IngestConfig, SourceConfig};
use siphon_engine::postgres::PostgresSinkFactory;
use siphon_engine::progress::ProgressCounters;
use siphon_engine::quarantine::QuarantineLog;
use siphon_engine::synthetic::SyntheticSource;
use siphon_engine::{run_ingest, IngestHarness};
use siphon_types::schema::RecordSchema;

/// Execute the `run` command: parse, validate, and run an ingestion.
pub async fn execute(
    config_path: &Path,
    limit: Option<u64>,
    duration_secs: Option<u64>,
    seed: u64,
) -> Result<()> {
    let config = parse_config(config_path)
        .with_context(|| format!("Failed to parse config: {}", config_path.display()))?;
    validate_config(&config)?;

    let mut limits = config.limits.clone();
    if limit.is_some() {
        limits.max_records = limit;
    }
    if duration_secs.is_some() {
        limits.max_duration_secs = duration_secs;
    }

    tracing::info!(
        pipeline = config.pipeline,
        fields = config.schema.field_count(),
        table = config.store.table,
        "Configuration validated"
    );

    let schema = Arc::new(config.schema.clone());
    let quarantine = match &config.quarantine_path {
        Some(path) => Arc::new(QuarantineLog::open(path)?),
        None => Arc::new(QuarantineLog::disabled()),
    };
    let counters = Arc::new(ProgressCounters::new());

    let (consumer, acker, replay_task) = build_source(&config, schema.clone(), seed).await?;

    let harness = IngestHarness {
        schema: schema.clone(),
        consumer,
        acker,
        sinks: Arc::new(PostgresSinkFactory::new(config.store.clone(), schema)),
        counters,
        quarantine: quarantine.clone(),
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Stop signal received, draining");
            let _ = stop_tx.send(true);
        }
    });

    let result = run_ingest(harness, &config.tuning, &limits, stop_rx).await?;

    if let Some(task) = replay_task {
        match task.await.context("replay task panicked")? {
            Ok(published) => tracing::debug!(published, "Replay task finished"),
            // The run ended before the feed did (limit or stop signal).
            Err(err) if err.code == "TOPIC_CLOSED" => {
                tracing::debug!("Replay stopped early")
            }
            Err(err) => return Err(err.into()),
        }
    }

    println!("Ingestion '{}' completed.", config.pipeline);
    println!("  Records attempted:   {}", result.counts.attempted);
    println!("  Records committed:   {}", result.counts.succeeded);
    println!("  Records quarantined: {}", result.counts.failed);
    println!("  Batches committed:   {}", result.counts.batches_committed);
    if result.counts.commit_retries > 0 {
        println!("  Commit retries:      {}", result.counts.commit_retries);
    }
    println!("  Duration:            {:.2}s", result.duration_secs);
    println!("  Throughput:          {:.0} records/sec", result.records_per_sec);
    for writer in &result.writers {
        println!(
            "  Writer[{}]:           {} batches, {} records, {:.2}s flushing",
            writer.shard, writer.batches_committed, writer.records_written, writer.flush_secs
        );
    }
    if let Some(path) = quarantine.path() {
        if result.quarantined > 0 {
            println!(
                "  Quarantine log:      {} ({} entries)",
                path.display(),
                result.quarantined
            );
        }
    }

    // Machine-readable JSON for benchmarking tools
    println!("@@RUN_JSON@@{}", serde_json::to_string(&result)?);

    if !result.is_balanced() {
        anyhow::bail!(
            "record accounting is unbalanced: {} attempted, {} committed, {} failed",
            result.counts.attempted,
            result.counts.succeeded,
            result.counts.failed
        );
    }
    Ok(())
}

type ReplayTask = tokio::task::JoinHandle<std::result::Result<u64, siphon_types::error::IngestError>>;

async fn build_source(
    config: &IngestConfig,
    schema: Arc<RecordSchema>,
    seed: u64,
) -> Result<(
    Box<dyn TopicConsumer>,
    Arc<dyn siphon_engine::broker::DeliveryAcker>,
    Option<ReplayTask>,
)> {
    match &config.source {
        SourceConfig::Replay { path } => {
            let topic = InProcessTopic::bounded(config.tuning.queue_capacity, false);
            let feed = path.clone();
            let publisher = topic.publisher;
            let task = tokio::spawn(async move { replay_file(&feed, &publisher).await });
            Ok((Box::new(topic.consumer), topic.ledger, Some(task)))
        }
        SourceConfig::Synthetic {
            records,
            malformed_every,
        } => {
            let source = SyntheticSource::new(schema, *records, *malformed_every, seed);
            Ok((
                Box::new(source),
                Arc::new(DeliveryLedger::new(false)),
                None,
            ))
        }
    }
}
