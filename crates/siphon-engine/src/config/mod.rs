//! Ingestion configuration: parsing, types, and semantic validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use parser::{parse_config, parse_config_str};
pub use types::{IngestConfig, PipelineTuning, RunLimits, SourceConfig, StoreConfig};
pub use validator::validate_config;
