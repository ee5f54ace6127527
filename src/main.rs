use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use lineup_ingest::{
    config::Config,
    database::{
        Database,
        repositories::{ChannelSeaOrmRepository, EpgChannelSeaOrmRepository, SyncJobSeaOrmRepository},
    },
    ingestor::StreamIngestor,
    jobs::{ChunkBudget, ChunkedJobRunner, JobKind, JobService, NetworkFetcher},
    sources::SourceFactory,
};

#[derive(Parser)]
#[command(name = "lineup-ingest")]
#[command(about = "Resumable channel lineup and EPG ingestion")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending database migrations
    Migrate,
    /// Create a sync job and poll it to completion
    Sync {
        /// Source owner id
        #[arg(long)]
        owner: Uuid,
        /// Target source id (lineup being refreshed)
        #[arg(long)]
        target: Uuid,
        /// Job kind: epg_sync, xtream_sync, m3u_sync, mapping_reconcile
        #[arg(long)]
        kind: JobKind,
        /// Source URL (ignored for mapping_reconcile)
        #[arg(long, default_value = "")]
        url: String,
        /// Per-chunk time budget in seconds
        #[arg(long, default_value_t = 10)]
        chunk_secs: u64,
    },
    /// Show a job's status
    Status { job_id: Uuid },
    /// Mark abandoned jobs failed and drop expired terminal rows
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("lineup_ingest={}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = Path::new(&cli.config);
    let config = Config::load(config_path.exists().then_some(config_path))?;

    let database = Database::new(&config.database).await?;
    database.migrate().await?;

    let connection = database.connection().clone();
    let jobs = Arc::new(SyncJobSeaOrmRepository::new(connection.clone()));
    let channels = Arc::new(ChannelSeaOrmRepository::new(connection.clone()));
    let epg_channels = Arc::new(EpgChannelSeaOrmRepository::new(connection));

    let ingestor = StreamIngestor::new(&config.fetch)?;
    let sources = SourceFactory::new(config.fetch.connect_timeout()?)?;
    let fetcher = Arc::new(NetworkFetcher::new(ingestor, sources));
    let spool_dir = spool_dir();
    let runner = ChunkedJobRunner::new(
        jobs.clone(),
        channels,
        epg_channels,
        fetcher,
        &config.jobs,
        spool_dir,
    );
    let service = JobService::new(jobs, &config.jobs)?;

    match cli.command {
        Command::Migrate => {
            info!("migrations applied");
        }
        Command::Sync {
            owner,
            target,
            kind,
            url,
            chunk_secs,
        } => {
            let job_id = service
                .create_job(owner, target, kind, url)
                .await?;
            info!(job_id = %job_id, "job created, polling");

            let margin = config.jobs.budget_safety_margin()?;
            loop {
                let budget = ChunkBudget::new(Duration::from_secs(chunk_secs), margin);
                let done = runner
                    .process_chunk(job_id, budget)
                    .await?;
                let snapshot = service
                    .get_job_status(job_id)
                    .await?;
                info!(
                    status = %snapshot.status,
                    progress = snapshot.progress,
                    processed = snapshot.processed_items,
                    total = snapshot.total_items,
                    message = snapshot.message.as_deref().unwrap_or(""),
                    "poll"
                );
                if done {
                    if let Some(err) = snapshot.error {
                        error!(job_id = %job_id, error = %err, "job failed");
                        std::process::exit(1);
                    }
                    break;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }
        Command::Status { job_id } => {
            let snapshot = service
                .get_job_status(job_id)
                .await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Sweep => {
            let (abandoned, deleted) = service
                .sweep_stale_jobs(&runner)
                .await?;
            info!(abandoned, deleted, "sweep complete");
        }
    }

    Ok(())
}

fn spool_dir() -> PathBuf {
    std::env::temp_dir().join("lineup-ingest")
}
