//! Semantic validation for parsed ingestion configuration values.

use anyhow::{bail, Result};

use crate::config::types::{IngestConfig, SourceConfig};

/// Validate a parsed ingestion configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_config(config: &IngestConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.pipeline.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    if let Err(e) = config.schema.validate() {
        errors.push(format!("Invalid schema: {e}"));
    }

    match &config.source {
        SourceConfig::Replay { path } => {
            if path.as_os_str().is_empty() {
                errors.push("Replay source requires a path".to_string());
            }
        }
        SourceConfig::Synthetic {
            records,
            malformed_every,
        } => {
            if *records == 0 {
                errors.push("Synthetic source must generate at least one record".to_string());
            }
            if *malformed_every == Some(0) {
                errors.push("malformed_every must be at least 1".to_string());
            }
        }
    }

    if config.store.host.trim().is_empty() {
        errors.push("Store host must not be empty".to_string());
    }
    if config.store.user.trim().is_empty() {
        errors.push("Store user must not be empty".to_string());
    }
    if config.store.database.trim().is_empty() {
        errors.push("Store database must not be empty".to_string());
    }
    if config.store.table.trim().is_empty() {
        errors.push("Store table must not be empty".to_string());
    }

    let tuning = &config.tuning;
    if tuning.batch_size == 0 {
        errors.push("batch_size must be at least 1".to_string());
    }
    if tuning.batch_max_wait_ms == 0 {
        errors.push("batch_max_wait_ms must be at least 1".to_string());
    }
    if tuning.queue_capacity == 0 {
        errors.push("queue_capacity must be at least 1".to_string());
    }
    if tuning.batch_size > tuning.queue_capacity && tuning.queue_capacity > 0 {
        errors.push(format!(
            "batch_size ({}) must not exceed queue_capacity ({})",
            tuning.batch_size, tuning.queue_capacity
        ));
    }
    if tuning.write_concurrency == 0 {
        errors.push("write_concurrency must be at least 1".to_string());
    }
    if tuning.enqueue_timeout_ms == 0 {
        errors.push("enqueue_timeout_ms must be at least 1".to_string());
    }
    if tuning.connection_retry_limit == 0 {
        errors.push("connection_retry_limit must be at least 1".to_string());
    }

    if config.limits.max_records == Some(0) {
        errors.push("max_records must be at least 1 when set".to_string());
    }
    if config.limits.max_duration_secs == Some(0) {
        errors.push("max_duration_secs must be at least 1 when set".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Config validation failed:\n  - {}", errors.join("\n  - "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_config_str;

    fn valid_yaml() -> &'static str {
        r#"
pipeline: market_feed
source:
  kind: replay
  path: feed.xml
store:
  host: localhost
  user: ingest
  database: feeds
  table: records
schema:
  record_element: record
  fields:
    - name: symbol
      kind: text
      required: true
    - name: price
      kind: float
"#
    }

    #[test]
    fn test_valid_config_passes() {
        let config = parse_config_str(valid_yaml()).unwrap();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_empty_pipeline_name_fails() {
        let yaml = valid_yaml().replace("market_feed", "\"\"");
        let config = parse_config_str(&yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("Pipeline name must not be empty"));
    }

    #[test]
    fn test_duplicate_schema_field_fails() {
        let yaml = valid_yaml().replace("name: price", "name: symbol");
        let config = parse_config_str(&yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("Invalid schema"));
    }

    #[test]
    fn test_zero_batch_size_fails() {
        let yaml = format!("{}\ntuning:\n  batch_size: 0\n", valid_yaml().trim_end());
        let config = parse_config_str(&yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("batch_size"));
    }

    #[test]
    fn test_batch_size_larger_than_queue_fails() {
        let yaml = format!(
            "{}\ntuning:\n  batch_size: 5000\n  queue_capacity: 100\n",
            valid_yaml().trim_end()
        );
        let config = parse_config_str(&yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("must not exceed queue_capacity"));
    }

    #[test]
    fn test_zero_write_concurrency_fails() {
        let yaml = format!(
            "{}\ntuning:\n  write_concurrency: 0\n",
            valid_yaml().trim_end()
        );
        let config = parse_config_str(&yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("write_concurrency"));
    }

    #[test]
    fn test_zero_max_records_fails() {
        let yaml = format!("{}\nlimits:\n  max_records: 0\n", valid_yaml().trim_end());
        let config = parse_config_str(&yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("max_records"));
    }

    #[test]
    fn test_empty_store_table_fails() {
        let yaml = valid_yaml().replace("table: records", "table: \"\"");
        let config = parse_config_str(&yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("table"));
    }

    #[test]
    fn test_all_errors_reported_together() {
        let yaml = r#"
pipeline: ""
source:
  kind: synthetic
  records: 0
store:
  host: ""
  user: ingest
  database: feeds
  table: records
schema:
  record_element: record
  fields: []
"#;
        let config = parse_config_str(yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("Pipeline name"));
        assert!(err.contains("at least one record"));
        assert!(err.contains("host"));
        assert!(err.contains("Invalid schema"));
    }
}
