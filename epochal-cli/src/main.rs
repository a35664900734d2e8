//! epochal CLI: train and evaluate the built-in demo classifier.
//!
//! `epochal train` runs the epoch orchestrator over a seeded synthetic
//! dataset and then scores the test split; `epochal test` reloads a saved
//! snapshot and scores the test split only.

mod commands;
mod config;
mod dataset;
mod softmax;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// epochal: train/validate/test epochs with best-model checkpointing
#[derive(Parser, Debug)]
#[command(name = "epochal", version, about, long_about = None)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Train the demo classifier, then evaluate it on the test split
    Train(TrainArgs),
    /// Evaluate a saved snapshot on the test split
    Test {
        /// Snapshot written by a previous `train --save-best`
        #[arg(long)]
        weights: PathBuf,

        /// Run id to report under (defaults to the snapshot's directory name)
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Default)]
struct TrainArgs {
    /// Run id; snapshots go to <weights_dir>/<run_id>/
    #[arg(long)]
    run_id: Option<String>,

    /// Number of train/validate epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Write a snapshot on every new best accuracy or loss
    #[arg(long)]
    save_best: bool,

    /// Root directory for snapshots
    #[arg(long)]
    weights_dir: Option<PathBuf>,

    /// Write the training report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Stop after training without scoring the test split
    #[arg(long)]
    skip_test: bool,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        #[arg(default_value = "epochal.toml")]
        path: PathBuf,
    },
    /// Show the effective configuration after all layers are applied
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "epochal", "epochal")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "epochal.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    if let Err(e) = commands::handle_command(cli.command, cli.config.as_deref()) {
        tracing::error!(error = %format!("{e:#}"), "Command failed");
        return Err(e);
    }
    Ok(())
}
