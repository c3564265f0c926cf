use std::path::Path;

use anyhow::{Context, Result};

use siphon_engine::config::parse_config;
use siphon_engine::synthetic::generate_feed;

/// Execute the `generate` command: write a synthetic replay feed.
pub fn execute(
    config_path: &Path,
    out: &Path,
    count: u64,
    malformed_every: Option<u64>,
    seed: u64,
) -> Result<()> {
    let config = parse_config(config_path)
        .with_context(|| format!("Failed to parse config: {}", config_path.display()))?;
    config
        .schema
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid schema: {e}"))?;

    let written = generate_feed(out, &config.schema, count, malformed_every, seed)
        .with_context(|| format!("Failed to write feed: {}", out.display()))?;

    println!("Wrote {} documents to {}", written, out.display());
    if let Some(every) = malformed_every {
        println!("  every {every}th document is malformed");
    }
    Ok(())
}
