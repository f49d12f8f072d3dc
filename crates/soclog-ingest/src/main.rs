//! SOCLOG Ingest - alert log loader

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use soclog_common::logging::{init_logging, LogConfig, LogLevel};
use soclog_ingest::config::{DEFAULT_CHECKPOINT_PATH, DEFAULT_SOURCE_PATH};
use soclog_ingest::db::{create_pool, health_check, DbConfig};
use soclog_ingest::{run_once, CheckpointStore, FileCheckpoint, IngestConfig, IngestError, IngestSummary, PgSink};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "soclog-ingest")]
#[command(author, version, about = "Load a JSON alert log into PostgreSQL")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Alert log to read
    #[arg(long, global = true, env = "SOCLOG_SOURCE", default_value = DEFAULT_SOURCE_PATH)]
    source: PathBuf,

    /// Watermark file
    #[arg(long, global = true, env = "SOCLOG_CHECKPOINT", default_value = DEFAULT_CHECKPOINT_PATH)]
    checkpoint: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest new records and print the run summary as JSON
    Run,

    /// Show the stored watermark and what the table holds
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("soclog-ingest")
        .build()
        .with_env_overrides()
        .context("Invalid SOCLOG_LOG_* settings")?;

    let _log_guard = init_logging(&log_config).context("Failed to initialize logging")?;

    let config = IngestConfig {
        source_path: cli.source,
        checkpoint_path: cli.checkpoint,
        database: DbConfig::from_env().context("Invalid database settings")?,
    };
    config.validate().context("Invalid configuration")?;

    match cli.command {
        Command::Run => run(&config).await,
        Command::Status => status(&config).await,
    }
}

async fn run(config: &IngestConfig) -> Result<()> {
    info!(source = %config.source_path.display(), "Ingesting alert log");

    match run_once(config).await {
        Ok(summary) => print_summary(&summary),
        Err(IngestError::Checkpoint { summary, source }) => {
            // rows are stored; report them before failing
            print_summary(&summary)?;
            Err(source).with_context(|| {
                format!("Checkpoint {} was not updated", config.checkpoint_path.display())
            })
        },
        Err(e) => {
            error!(error = %e, "Ingestion aborted");
            Err(e.into())
        },
    }
}

fn print_summary(summary: &IngestSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
    println!("{json}");
    Ok(())
}

async fn status(config: &IngestConfig) -> Result<()> {
    let watermark = FileCheckpoint::new(&config.checkpoint_path).load().await;

    let pool = create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;
    let database_healthy = health_check(&pool).await.is_ok();

    let sink = PgSink::new(pool.clone());
    let (rows, latest) = match (sink.row_count().await, sink.latest_event_time().await) {
        (Ok(rows), Ok(latest)) => (Some(rows), latest),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "Could not read the logs table");
            (None, None)
        },
    };
    pool.close().await;

    let report = serde_json::json!({
        "source": config.source_path,
        "source_present": config.source_path.is_file(),
        "checkpoint": config.checkpoint_path,
        "watermark": watermark,
        "database_healthy": database_healthy,
        "rows": rows,
        "latest_event_time": latest.map(|t| t.to_rfc3339()),
    });
    println!("{}", serde_json::to_string_pretty(&report).context("Failed to serialize status")?);

    Ok(())
}
