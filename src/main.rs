use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use trading_cognition::config::LoggingConfig;
use trading_cognition::monitoring::SimpleHealthResponse;
use trading_cognition::orchestrator::wait_for_shutdown_signal;
use trading_cognition::storage::{collections, Query, SortDirection};
use trading_cognition::{CognitiveOrchestrator, Config, FileStorage, StorageBackend};

#[derive(Parser)]
#[command(name = "trading-cognition")]
#[command(about = "Cognitive runtime for autonomous trading agents")]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables still apply)
    #[arg(long, global = true, env = "COGNITION_CONFIG")]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the runtime until Ctrl+C or SIGTERM
    Run,
    /// Show the persisted state without starting the runtime
    Status,
    /// Check system health
    Health {
        /// Show every component
        #[arg(long)]
        detailed: bool,
    },
    /// Archive one day of thoughts (defaults to yesterday)
    Archive {
        /// Day to archive, YYYY-MM-DD
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print or write a sample configuration file
    InitConfig {
        /// Write to this path instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let (json, plain) = if config.json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn open_orchestrator(config: Config) -> Result<(CognitiveOrchestrator, Arc<FileStorage>)> {
    let storage = Arc::new(
        FileStorage::open(&config.storage.data_dir)
            .await
            .with_context(|| {
                format!("Failed to open data directory {}", config.storage.data_dir.display())
            })?
            .with_max_snapshots(config.storage.max_snapshots)
            .with_compaction_threshold(config.storage.compaction_threshold),
    );
    let orchestrator = CognitiveOrchestrator::new(config, storage.clone())?;
    Ok((orchestrator, storage))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::InitConfig { output }) = &cli.command {
        let sample = Config::sample_toml()?;
        match output {
            Some(path) => {
                std::fs::write(path, sample)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Wrote sample configuration to {}", path.display());
            }
            None => print!("{sample}"),
        }
        return Ok(());
    }

    let config = load_config(&cli)?;
    init_logging(&config.logging);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Status => status(config).await,
        Commands::Health { detailed } => health(config, detailed).await,
        Commands::Archive { date } => archive(config, date).await,
        Commands::InitConfig { .. } => Ok(()),
    }
}

async fn run(config: Config) -> Result<()> {
    let (orchestrator, _) = open_orchestrator(config).await?;
    orchestrator.start().await?;

    if orchestrator.is_minimal_mode() {
        tracing::error!("Running in minimal mode; background processing is disabled");
    }
    info!(state = %orchestrator.get_current_state().await, "Runtime ready");

    wait_for_shutdown_signal().await;
    orchestrator.shutdown().await;
    Ok(())
}

async fn status(config: Config) -> Result<()> {
    let (_, storage) = open_orchestrator(config).await?;

    let state = storage
        .get_item(collections::COGNITIVE_STATE, collections::CURRENT_STATE_ID)
        .await?;
    let transitions = storage
        .query_collection(
            collections::STATE_TRANSITIONS,
            &Query::new()
                .order_by("timestamp", SortDirection::Descending)
                .limit(5),
        )
        .await?;
    let latest_snapshot = storage.load_latest_snapshot().await?;
    let thoughts = storage
        .query_collection(collections::THOUGHTS, &Query::new())
        .await?
        .len();

    let report = json!({
        "data_dir": storage.root().display().to_string(),
        "state": state,
        "recent_transitions": transitions,
        "thoughts": thoughts,
        "latest_snapshot": latest_snapshot.map(|s| json!({"id": s.id, "created_at": s.created_at})),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn health(config: Config, detailed: bool) -> Result<()> {
    let (orchestrator, _) = open_orchestrator(config).await?;
    let health = orchestrator.health_check().await;

    if detailed {
        println!("{}", serde_json::to_string_pretty(&health)?);
    } else {
        let simple = SimpleHealthResponse::from(&health);
        println!("{}", serde_json::to_string_pretty(&simple)?);
    }

    if !health.is_healthy() {
        bail!("System is {}", health.status);
    }
    Ok(())
}

async fn archive(config: Config, date: Option<NaiveDate>) -> Result<()> {
    let day = date.unwrap_or_else(|| Utc::now().date_naive() - chrono::Duration::days(1));
    let (orchestrator, _) = open_orchestrator(config).await?;

    if !orchestrator.journal().archive_daily_thoughts(day).await {
        bail!("Archival of {day} failed");
    }
    println!("Archived thoughts for {day}");
    Ok(())
}
