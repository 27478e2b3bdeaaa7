//! PostgreSQL Backup Restorer
//!
//! Replaces a PostgreSQL data directory with a backup and its WAL segments,
//! stopping and restarting the database service around the swap.

// pgdata-restorer/src/main.rs
mod config;
mod errors;
mod restore;
mod utils;

use anyhow::{Context, Result};
use config::{AppConfig, DEFAULT_CONFIG_PATH};
use indicatif::{ProgressBar, ProgressStyle};
use restore::{RestoreOrchestrator, RestoreOutcome, RestoreRequest, RestoreScheduler};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use utils::process::SystemCommandRunner;

const PROGRAM_NAME: &str = "PostgreSQL Backup Restorer";
const CONFIG_PATH_ENV: &str = "PGRESTORE_CONFIG";

/// Main entry point for the restorer.
///
/// Only a failure to bring the tool up yields a non-zero exit status; the
/// result of the restore itself is reported on screen and in the log.
#[tokio::main]
async fn main() -> ExitCode {
    match run_app().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    dotenv::dotenv().ok();

    let config_path = env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let app_config = AppConfig::load(&config_path).context(format!(
        "Failed to load application configuration from {}",
        config_path.display()
    ))?;

    utils::logging::init_file_logging(&app_config.log_file)?;
    log::info!("Starting {} with {:?}", PROGRAM_NAME, app_config.restore);

    println!("{}\n", PROGRAM_NAME);
    println!("Data directory:    {}", app_config.restore.pgdata_dir.display());
    println!("WAL backup dir:    {}\n", app_config.restore.wal_backup_dir.display());

    let backup_dir = match env::args().nth(1) {
        Some(arg) => arg,
        None => match prompt_backup_dir()? {
            Some(path) => path,
            None => {
                log::info!("Operator quit without starting a restore");
                return Ok(());
            }
        },
    };
    let request = RestoreRequest::new(&backup_dir)?;

    let orchestrator = RestoreOrchestrator::new(app_config.restore, Arc::new(SystemCommandRunner));
    let scheduler = RestoreScheduler::new(orchestrator);
    let handle = scheduler.submit(request)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .context("Invalid spinner template")?,
    );
    spinner.set_message(format!("Restoring from {}...", backup_dir));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let outcome = handle.outcome().await;
    spinner.finish_and_clear();

    match outcome {
        RestoreOutcome::Success => println!("✅ Backup restored successfully."),
        RestoreOutcome::Failure(e) => {
            println!("❌ Restore failed: {}", e);
            println!("   See {} for details.", app_config.log_file.display());
        }
    }
    Ok(())
}

/// Prompts for the backup directory until a non-empty path is entered.
///
/// Returns `None` when the operator quits with `q`, `quit` or end of input.
fn prompt_backup_dir() -> Result<Option<String>> {
    use std::io::{Write, stdin, stdout};

    loop {
        print!("Enter the path to the backup directory (q to quit): ");
        stdout().flush().context("Failed to flush stdout")?;

        let mut input = String::new();
        let read = stdin()
            .read_line(&mut input)
            .context("Failed to read user input")?;
        if read == 0 {
            return Ok(None);
        }

        match input.trim() {
            "" => continue,
            "q" | "quit" => return Ok(None),
            path => return Ok(Some(path.to_string())),
        }
    }
}
