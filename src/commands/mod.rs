use anyhow::{Context, Result, bail};
use log::{debug, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::{
    engine::{BatchMode, BatchReport},
    orchestrator::CancelToken,
    runtime::Runtime,
};

mod output;
pub mod services;

use output::{candidate_lines, describe, inventory_lines, unavailable_lines};
use services::Services;

/// Paths given on the command line (or via environment).
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub config: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
}

fn load<R: Runtime + 'static>(runtime: R, options: Options) -> Result<Services<R>> {
    Services::load(Arc::new(runtime), options.config, options.backup_dir)
}

/// List installed programs.
#[tracing::instrument(skip(runtime))]
pub async fn scan<R: Runtime + 'static>(runtime: R, options: Options) -> Result<()> {
    let services = load(runtime, options)?;
    let snapshot = services.engine(false)?.scan().await;

    for line in unavailable_lines(&snapshot) {
        eprintln!("{}", line);
    }
    if snapshot.is_empty() {
        println!("No programs found.");
        return Ok(());
    }
    for line in inventory_lines(&snapshot) {
        println!("{}", line);
    }
    println!("{} program(s)", snapshot.len());
    Ok(())
}

/// List available updates without applying them.
#[tracing::instrument(skip(runtime))]
pub async fn check<R: Runtime + 'static>(runtime: R, options: Options) -> Result<()> {
    let services = load(runtime, options)?;
    let report = services.engine(false)?.run_batch(BatchMode::ScanOnly).await;

    for line in unavailable_lines(&report.snapshot) {
        eprintln!("{}", line);
    }
    if report.candidates.is_empty() {
        println!("No updates available.");
    }
    for line in candidate_lines(&report) {
        println!("{}", line);
    }
    if !report.undecidable.is_empty() {
        println!(
            "{} program(s) have versions that could not be compared",
            report.undecidable.len()
        );
    }
    Ok(())
}

/// Apply available updates: all of them, or those matching `ids`.
///
/// Ctrl-C cancels the batch; the update in progress is rolled back.
#[tracing::instrument(skip(runtime))]
pub async fn upgrade<R: Runtime + 'static>(
    runtime: R,
    options: Options,
    ids: Vec<String>,
    assume_yes: bool,
) -> Result<()> {
    let services = load(runtime, options)?;
    let cancel = CancelToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = services
        .engine(assume_yes)?
        .with_events(tx)
        .with_cancel(cancel.clone());

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling the remaining updates");
            cancel.cancel();
        }
    });

    let mode = if ids.is_empty() {
        BatchMode::ApplyAll
    } else {
        BatchMode::ApplySelected(ids)
    };
    let batch = async move {
        let report = engine.run_batch(mode).await;
        // closes the event channel
        drop(engine);
        report
    };
    let progress = async {
        while let Some(event) = rx.recv().await {
            if let Some(line) = describe(&event) {
                println!("{}", line);
            }
        }
    };
    let (report, ()) = tokio::join!(batch, progress);
    interrupt.abort();

    for line in unavailable_lines(&report.snapshot) {
        eprintln!("{}", line);
    }
    if report.outcomes.is_empty() {
        println!("No updates available.");
        return Ok(());
    }
    println!("{}", report.summary);

    let unsuccessful = report.summary.failed + report.summary.rolled_back;
    if unsuccessful > 0 {
        bail!("{} update(s) did not complete", unsuccessful);
    }
    Ok(())
}

/// Write a full scan report as JSON to `file`, or stdout.
#[tracing::instrument(skip(runtime))]
pub async fn export<R: Runtime + 'static>(runtime: R, options: Options, file: Option<PathBuf>) -> Result<()> {
    let services = load(runtime, options)?;
    let report = services.engine(false)?.run_batch(BatchMode::ScanOnly).await;
    let json = render_report(&report)?;

    match file {
        Some(path) => {
            services
                .runtime
                .write(&path, json.as_bytes())
                .with_context(|| format!("Failed to write report to {:?}", path))?;
            debug!("Report written to {:?}", path);
            println!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn render_report(report: &BatchReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to serialize report")
}

/// List the backup records kept for a program, oldest first.
#[tracing::instrument(skip(runtime))]
pub async fn backups<R: Runtime + 'static>(runtime: R, options: Options, id: &str) -> Result<()> {
    let services = load(runtime, options)?;
    let store = services.backup_store()?;
    let records = store.find(id).await?;

    if records.is_empty() {
        println!("No backups for {}.", id.trim());
        return Ok(());
    }
    for record in records {
        let artifact = &record.artifact_reference;
        println!(
            "{} {} via {}{}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
            record.pre_update_version,
            artifact.source,
            artifact
                .package_id
                .as_deref()
                .map(|p| format!(" ({})", p))
                .unwrap_or_default()
        );
    }
    Ok(())
}

/// Print the configuration file location and its effective contents.
#[tracing::instrument(skip(runtime))]
pub fn show_config<R: Runtime + 'static>(runtime: R, options: Options) -> Result<()> {
    let services = load(runtime, options)?;
    println!("Configuration: {}", services.config_path.display());
    println!("Backups: {}", services.backup_dir.display());
    println!("{}", serde_json::to_string_pretty(&services.config)?);
    Ok(())
}
