use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fieldsync::application::services::CycleOutcome;
use fieldsync::domain::value_objects::{QueueEntryId, TenantId};
use fieldsync::shared::{AppConfig, logging};
use fieldsync::AppState;
use tracing::info;

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "Offline-first sync engine for field-service records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Tenant whose data is synchronized
    #[arg(short, long, env = "FIELDSYNC_TENANT")]
    tenant: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current sync state
    Status,
    /// Run one sync cycle now
    Sync,
    /// List changes the remote service rejected for good
    Failed,
    /// Put a failed change back in the queue
    Retry { id: i64 },
    /// Drop a failed change
    Discard { id: i64 },
    /// Delete all local records, queued changes and the sync checkpoint
    Reset,
    /// Sync in the background until Ctrl+C
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.json_logs)?;

    let config = AppConfig::from_env();
    let tenant = TenantId::new(cli.tenant.clone()).map_err(anyhow::Error::msg)?;
    let state = AppState::new(config, tenant)
        .await
        .context("failed to open local data")?;

    let result = run(&state, cli.command).await;
    state.shutdown().await;
    result
}

async fn run(state: &AppState, command: Commands) -> Result<()> {
    let orchestrator = &state.orchestrator;
    match command {
        Commands::Status => {
            println!("{}", serde_json::to_string_pretty(&orchestrator.current())?);
        }
        Commands::Sync => match orchestrator.request_sync().await {
            CycleOutcome::Completed(report) => {
                println!(
                    "{}: pushed {}, failed {}, deferred {}, uploaded {}, pulled {}, removed {}",
                    report
                        .status
                        .map(|status| status.as_str())
                        .unwrap_or("unknown"),
                    report.pushed,
                    report.failed,
                    report.deferred,
                    report.uploaded,
                    report.pulled,
                    report.removed
                );
                for error in &report.errors {
                    println!("  {error}");
                }
            }
            CycleOutcome::AlreadyRunning => println!("a sync is already running"),
            CycleOutcome::Skipped(reason) => println!("sync skipped: {reason:?}"),
        },
        Commands::Failed => {
            let failed = orchestrator.failed_changes().await?;
            if failed.is_empty() {
                println!("no failed changes");
            }
            for entry in failed {
                println!(
                    "#{} {} {} {} (retries: {}) {}",
                    entry.id,
                    entry.operation,
                    entry.entity_type,
                    entry.entity_id,
                    entry.retry_count,
                    entry.last_error.as_deref().unwrap_or("")
                );
            }
        }
        Commands::Retry { id } => {
            let entry = orchestrator.retry_failed(queue_id(id)?).await?;
            println!("re-queued #{} {} {}", entry.id, entry.operation, entry.entity_type);
        }
        Commands::Discard { id } => {
            let entry = orchestrator.discard_failed(queue_id(id)?).await?;
            println!("discarded #{} {} {}", entry.id, entry.operation, entry.entity_type);
        }
        Commands::Reset => {
            orchestrator.reset_local_data().await?;
            println!("local data cleared");
        }
        Commands::Run => {
            state.start_scheduler().await;
            info!(
                tenant = %state.tenant_id,
                interval_secs = state.config.sync.sync_interval,
                "fieldsync is running. Press Ctrl+C to stop."
            );
            tokio::signal::ctrl_c().await?;
            info!("Shutting down fieldsync...");
        }
    }
    Ok(())
}

fn queue_id(id: i64) -> Result<QueueEntryId> {
    match QueueEntryId::new(id) {
        Ok(id) => Ok(id),
        Err(err) => bail!(err),
    }
}
