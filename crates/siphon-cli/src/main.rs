mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "siphon",
    version,
    about = "Streaming XML-to-PostgreSQL ingestion pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an ingestion pipeline
    Run {
        /// Path to ingestion YAML file
        config: PathBuf,
        /// Maximum records to ingest, overriding the configured limit
        #[arg(long)]
        limit: Option<u64>,
        /// Maximum run duration in seconds, overriding the configured limit
        #[arg(long)]
        duration_secs: Option<u64>,
        /// Seed for the synthetic source
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Validate configuration and store connectivity
    Check {
        /// Path to ingestion YAML file
        config: PathBuf,
    },
    /// Generate a synthetic replay feed
    Generate {
        /// Path to ingestion YAML file (provides the record schema)
        config: PathBuf,
        /// Output feed file
        #[arg(short, long)]
        out: PathBuf,
        /// Number of documents to generate
        #[arg(long, default_value_t = 10_000)]
        count: u64,
        /// Emit one malformed document every N records
        #[arg(long)]
        malformed_every: Option<u64>,
        /// Generator seed
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run {
            config,
            limit,
            duration_secs,
            seed,
        } => commands::run::execute(&config, limit, duration_secs, seed).await,
        Commands::Check { config } => commands::check::execute(&config).await,
        Commands::Generate {
            config,
            out,
            count,
            malformed_every,
            seed,
        } => commands::generate::execute(&config, &out, count, malformed_every, seed),
    }
}
