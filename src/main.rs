//! Database Backup Tool
//!
//! Dumps a MySQL database, archives and stages the dump, then fans the
//! archive out to every configured FTP / S3 target.

// databasebackup/src/main.rs
mod backup;
mod config;
mod errors;
mod utils;

use anyhow::{Context, Result};
use backup::logic::{DeliveryOutcome, PipelineReport};
use config::{CONFIG_PATH_ENV, ConfigSource, DEFAULT_CONFIG_PATH, JsonFileConfigSource};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    init_tracing();

    match run_app().await {
        Ok(true) => {
            println!("✅ Backup completed successfully.");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            eprintln!("❌ Backup staged, but not every target received it.");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Runs one backup. `Ok(false)` means the archive was staged but the
/// configured delivery policy was not met.
async fn run_app() -> Result<bool> {
    // CLI argument first, then BACKUP_CONFIG_PATH, then ./config.json.
    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let app_config = JsonFileConfigSource::new(&config_path)
        .load_config()
        .with_context(|| {
            format!(
                "Failed to load application configuration from {}",
                config_path.display()
            )
        })?;

    let report = backup::run_backup_flow(&app_config)
        .await
        .context("Backup process failed")?;
    print_summary(&report);

    Ok(report.all_delivered() || !app_config.delivery.require_all_targets)
}

fn print_summary(report: &PipelineReport) {
    println!("Run {}", report.run_id);
    println!("📦 Staged archive: {}", report.staged_path.display());
    if let Some(warning) = &report.cleanup_warning {
        println!("⚠️ {}", warning);
    }
    if report.outcomes.is_empty() {
        println!("No upload targets configured.");
    }
    for outcome in &report.outcomes {
        match &outcome.outcome {
            DeliveryOutcome::Delivered => println!("  ✓ {}", outcome.target),
            DeliveryOutcome::Failed(e) => println!("  ✗ {} ({}: {})", outcome.target, e.stage, e.message),
        }
    }
    println!(
        "Delivered to {}/{} target(s).",
        report.delivered_count(),
        report.outcomes.len()
    );
}
