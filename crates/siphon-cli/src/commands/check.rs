use std::path::Path;

use anyhow::{Context, Result};

use siphon_engine::config::{parse_config, validate_config, SourceConfig};
use siphon_engine::postgres;

/// Execute the `check` command: validate configuration and store connectivity.
pub async fn execute(config_path: &Path) -> Result<()> {
    let config = parse_config(config_path)
        .with_context(|| format!("Failed to parse config: {}", config_path.display()))?;

    validate_config(&config)?;
    println!("Configuration:     OK");

    let mut failed = false;

    if let SourceConfig::Replay { path } = &config.source {
        if path.is_file() {
            println!("Replay feed:       OK");
        } else {
            println!("Replay feed:       FAILED");
            println!("  file not found: {}", path.display());
            failed = true;
        }
    }

    match postgres::validate(&config.store).await {
        Ok(message) => {
            println!("Store:             OK");
            if !message.is_empty() {
                println!("  {message}");
            }
        }
        Err(err) => {
            println!("Store:             FAILED");
            println!("  {}", err.message);
            failed = true;
        }
    }

    if failed {
        anyhow::bail!("One or more checks failed")
    }
    println!("\nAll checks passed.");
    Ok(())
}
