//! Command-line interface definitions for the `snapexport` binary.
//!
//! This module centralises the clap parser structures so both the main
//! binary and the build script can reuse them when generating the manual
//! page.

use clap::Parser;

/// Top-level CLI for the `snapexport` binary.
#[derive(Debug, Parser)]
#[command(
    name = "snapexport",
    about = "Restore block-storage snapshots onto an instance and export application files to object storage",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run one concurrent export job per snapshot in the manifest.
    #[command(
        name = "export",
        about = "Restore, mount, and export every snapshot in the manifest"
    )]
    Export(ExportCommand),
    /// Delete leaked tool-tagged volumes left behind by crashed runs.
    #[command(name = "sweep", about = "Delete leaked snapexport-tagged volumes")]
    Sweep,
}

/// Arguments for the `snapexport export` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ExportCommand {
    /// Path to the snapshot manifest: one reference per line, first
    /// comma-separated field.
    #[arg(value_name = "MANIFEST")]
    pub(crate) manifest: String,
    /// Override the configured concurrency limit for this run.
    #[arg(long, value_name = "N")]
    pub(crate) max_concurrent_jobs: Option<usize>,
}
