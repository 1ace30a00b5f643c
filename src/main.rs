//! Binary entry point for the snapexport CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use snapexport::{
    BatchSummary, DeviceAllocator, ExportConfig, ExportOrchestrator, GatewayClient, Janitor,
    ManifestError, SweepSummary, load_snapshot_manifest,
};

mod cli;

use cli::{Cli, ExportCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("sweep failed: {0}")]
    Sweep(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Export(command) => run_export(command).await,
        Cli::Sweep => run_sweep().await,
    }
}

async fn run_export(args: ExportCommand) -> Result<i32, CliError> {
    let config =
        ExportConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let mut plan = config
        .export_plan()
        .map_err(|err| CliError::Config(err.to_string()))?;
    if args.max_concurrent_jobs.is_some() {
        plan.max_concurrent_jobs = args.max_concurrent_jobs;
    }

    let manifest_path = Utf8PathBuf::from(args.manifest);
    let snapshots = load_snapshot_manifest(&manifest_path)?;

    let client = GatewayClient::new(&config.api_base_url, &config.api_token);
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let orchestrator = ExportOrchestrator::new(
        client.clone(),
        client,
        DeviceAllocator::new(),
        plan,
        cancel,
    );
    let summary = orchestrator.run(snapshots).await;
    write_summary(io::stdout(), &summary);

    Ok(if summary.failed() == 0 { 0 } else { 1 })
}

async fn run_sweep() -> Result<i32, CliError> {
    let config =
        ExportConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;

    let client = GatewayClient::new(&config.api_base_url, &config.api_token);
    let janitor = Janitor::new(client, &config.availability_zone);
    let summary = janitor
        .sweep()
        .await
        .map_err(|err| CliError::Sweep(err.to_string()))?;
    write_sweep_summary(io::stdout(), &summary);
    Ok(0)
}

/// Cancels all in-flight jobs when the process receives an interrupt, so
/// active poll loops exit promptly instead of sleeping out their interval.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling in-flight jobs");
            cancel.cancel();
        }
    });
}

fn write_summary(mut target: impl Write, summary: &BatchSummary) {
    for report in &summary.reports {
        match &report.result {
            Ok(outcome) => {
                writeln!(
                    target,
                    "{}: exported to {}",
                    report.snapshot_id, outcome.object_prefix
                )
                .ok();
            }
            Err(failure) => {
                writeln!(target, "{}: failed: {failure}", report.snapshot_id).ok();
            }
        }
        for cleanup in &report.cleanup_failures {
            writeln!(
                target,
                "{}: cleanup {} failed for volume {}: {}",
                report.snapshot_id, cleanup.action, cleanup.volume_id, cleanup.message
            )
            .ok();
        }
    }
    writeln!(
        target,
        "{} succeeded, {} failed",
        summary.succeeded(),
        summary.failed()
    )
    .ok();
}

fn write_sweep_summary(mut target: impl Write, summary: &SweepSummary) {
    writeln!(
        target,
        "deleted {} leaked volume(s), skipped {}",
        summary.deleted_volumes, summary.skipped_volumes
    )
    .ok();
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
