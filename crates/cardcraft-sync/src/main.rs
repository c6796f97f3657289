//! CardCraft Sync - catalog synchronization tool

use anyhow::{Context, Result};
use cardcraft_common::logging::{init_logging, LogConfig, LogLevel};
use cardcraft_sync::config::SyncConfig;
use cardcraft_sync::source::{SourceClient, SourceEndpoint};
use cardcraft_sync::storage::{
    CatalogStore, ImportCursorStore, MemoryCatalogStore, MemoryCursorStore, PgCatalogStore,
    PgImportCursorStore,
};
use cardcraft_sync::{ImportOptions, RunReport, Scheduler, SyncError, SyncPipeline};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long `schedule` waits for an in-flight run after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "cardcraft-sync")]
#[command(author, version, about = "CardCraft card catalog synchronization")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import one source, or every configured source
    Import {
        /// Source id (see `sources`)
        #[arg(short, long, required_unless_present = "all", conflicts_with = "all")]
        source: Option<String>,

        /// Import every configured source
        #[arg(long)]
        all: bool,

        /// Ignore the import cursor
        #[arg(short, long)]
        force: bool,

        /// Reconcile against an empty in-memory catalog instead of the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Run every source now and then on the configured interval until stopped
    Schedule,

    /// List configured sources
    Sources,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("cardcraft-sync")
        .build()
        .with_env_overrides()?;

    let _log_guard = init_logging(&log_config)?;

    let config = SyncConfig::load().context("Invalid configuration")?;

    match cli.command {
        Command::Sources => list_sources(&config),
        Command::Import {
            source,
            all,
            force,
            dry_run,
        } => {
            let sources = match source {
                Some(id) => vec![id],
                None if all => config.sources.enabled.clone(),
                None => anyhow::bail!("Either --source or --all is required"),
            };
            import(&config, sources, ImportOptions { force }, dry_run).await
        },
        Command::Schedule => schedule(&config).await,
    }
}

fn list_sources(config: &SyncConfig) -> Result<()> {
    for spec in config.source_specs()? {
        let url = match &spec.endpoint {
            SourceEndpoint::Listing { url, dataset_type } => format!("{url} [{dataset_type}]"),
            SourceEndpoint::Direct { url } => url.clone(),
            SourceEndpoint::Paged {
                sets_url,
                cards_url,
                page_size,
            } => format!("{cards_url} (sets: {sets_url}, page size {page_size})"),
        };
        println!("{}\t{}\t{}", spec.id, spec.game, url);
    }
    Ok(())
}

async fn import(
    config: &SyncConfig,
    sources: Vec<String>,
    options: ImportOptions,
    dry_run: bool,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let pipeline = build_pipeline(config, dry_run, cancel.clone()).await?;

    // Stop cleanly at the next batch boundary on Ctrl+C
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, cancelling import");
            interrupt.cancel();
        }
    });

    let mut failed: Vec<String> = Vec::new();
    for source_id in &sources {
        if cancel.is_cancelled() {
            break;
        }

        match pipeline.run_import_with(source_id, options).await {
            Ok(report) => {
                print_report(&report);
                if report.should_fail_exit() {
                    failed.push(source_id.clone());
                }
            },
            Err(e) => {
                error!(source = %source_id, error = %e, "Import failed");
                println!("{source_id}: failed: {e}");
                failed.push(source_id.clone());
            },
        }
    }

    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled.into());
    }
    if !failed.is_empty() {
        anyhow::bail!("Import failed for: {}", failed.join(", "));
    }

    info!("Import complete");
    Ok(())
}

async fn schedule(config: &SyncConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    let pipeline = Arc::new(build_pipeline(config, false, cancel.clone()).await?);
    let sources = pipeline.sources().iter().map(|s| s.id.clone()).collect();

    let scheduler = Scheduler::new(pipeline, sources, config.interval(), cancel);
    scheduler.start().await?;

    shutdown_signal().await;

    scheduler.shutdown(SHUTDOWN_GRACE).await?;
    info!("Scheduler shut down gracefully");
    Ok(())
}

async fn build_pipeline(
    config: &SyncConfig,
    dry_run: bool,
    cancel: CancellationToken,
) -> Result<SyncPipeline> {
    let (store, cursors): (Arc<dyn CatalogStore>, Arc<dyn ImportCursorStore>) = if dry_run {
        warn!("Dry run: reconciling against an empty in-memory catalog");
        (
            Arc::new(MemoryCatalogStore::new()),
            Arc::new(MemoryCursorStore::new()),
        )
    } else {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database.url)
            .await
            .context("Failed to connect to database")?;
        info!("Database connection pool established");
        (
            Arc::new(PgCatalogStore::new(pool.clone())),
            Arc::new(PgImportCursorStore::new(pool)),
        )
    };

    let client = SourceClient::new(&config.client_settings())?;

    Ok(SyncPipeline::new(client, store, cursors, config.source_specs()?)
        .with_batch_size(config.pipeline.batch_size)
        .with_pool_config(config.pool_config())
        .with_cancellation(cancel))
}

fn print_report(report: &RunReport) {
    print!("{report}");
    if report.up_to_date {
        println!();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
