use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use qkb_harvester::application::{RunOrchestrator, TriggerOutcome, trigger};
use qkb_harvester::infrastructure::browser::ChromiumSession;
use qkb_harvester::infrastructure::browser::chromium::locate_executable;
use qkb_harvester::infrastructure::logging::log_system_info;
use qkb_harvester::infrastructure::{ConfigManager, DatabaseConnection, SqliteEntityRepository, init_logging_with_config};

/// Exit code when another harvest holds the run lock
const EXIT_ALREADY_RUNNING: u8 = 2;

/// Harvests IT companies from the QKB business registry into SQLite.
#[derive(Debug, Parser)]
#[command(name = "qkb-harvester", version, about)]
struct Cli {
    /// Configuration file (TOML or JSON); built-in defaults apply when omitted
    #[arg(long, env = "QKB_HARVEST_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli.config).await {
        Ok(code) => code,
        Err(e) => {
            error!("Harvest aborted: {:#}", e);
            eprintln!("Harvest aborted: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: Option<PathBuf>) -> Result<ExitCode> {
    let manager = ConfigManager::new(config_path);
    let config = manager.load().context("loading configuration")?;

    let log_dir = config.log_directory()?;
    init_logging_with_config(&config.logging, &log_dir).context("initializing logging")?;
    log_system_info();

    let executable = locate_executable(&config.browser)?;
    info!("Using browser at {:?}", executable);

    let database_url = config.database_url()?;
    let db = DatabaseConnection::with_max_connections(&database_url, config.database.max_connections)
        .await
        .with_context(|| format!("opening database {database_url}"))?;
    db.migrate().await.context("migrating database")?;

    let repository = Arc::new(SqliteEntityRepository::new(
        db.pool().clone(),
        &config.run.source_tag,
        &config.registry.primary_city,
    ));
    let lock_path = config.lock_path()?;
    let browser_settings = config.browser.clone();
    let orchestrator = RunOrchestrator::new(config, repository)?;

    let handle = match trigger(orchestrator, &lock_path, move || async move {
        ChromiumSession::launch(&browser_settings, &executable).await
    })? {
        TriggerOutcome::Started(handle) => handle,
        TriggerOutcome::AlreadyRunning => {
            warn!("Another harvest holds {:?}; not starting", lock_path);
            db.close().await;
            return Ok(ExitCode::from(EXIT_ALREADY_RUNNING));
        }
    };

    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping at the next boundary");
            cancel.cancel();
        }
    });

    let summary = handle.wait().await?;
    db.close().await;

    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
