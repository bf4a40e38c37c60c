//! Cadence - durable task scheduler and step runner
//!
//! Main entry point for the Cadence CLI.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};

mod commands;

use commands::{codex, schedules, serve, tasks};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Cadence - durable task scheduler and step runner
#[derive(Parser)]
#[command(name = "cadence")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to config file (overrides default discovery)
    #[arg(long, global = true, env = "CADENCE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the task database (overrides config)
    #[arg(long, global = true, env = "CADENCE_DB")]
    pub db: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the dispatcher until interrupted
    Serve(serve::ServeArgs),

    /// Register and list codices
    Codex(codex::CodexArgs),

    /// Create, inspect and control tasks
    Tasks(tasks::TasksArgs),

    /// Enable, disable and remove schedules
    Schedules(schedules::SchedulesArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = match cli.config {
        Some(ref path) => cadence_config::LoadedConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => cadence_config::load_config(None)?,
    };
    loaded.config.validate()?;
    let logging = loaded.config.logging();

    // Console (human-readable) plus a rotating JSON file
    let console_filter = if cli.verbose {
        "cadence=debug,cadence_engine=debug,cadence_runner=debug,cadence_store=debug,info".to_string()
    } else {
        format!(
            "cadence={0},cadence_engine={0},cadence_runner={0},cadence_store={0},warn",
            logging.level
        )
    };

    let log_dir = logging
        .dir
        .clone()
        .or_else(|| cadence_config::xdg_config_dir().map(|d| d.join("logs")))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "cadence.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(console_filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "cadence=trace,cadence_engine=trace,cadence_runner=trace,cadence_store=trace,info",
                )),
        )
        .init();

    for warning in &loaded.warnings {
        eprintln!("warning: {}", warning);
    }

    let ctx = commands::Context::new(loaded, cli.db, cli.json, cli.verbose)?;

    // Dispatch to command handlers
    match cli.command {
        Commands::Serve(args) => serve::run(args, &ctx).await,
        Commands::Codex(args) => codex::run(args, &ctx).await,
        Commands::Tasks(args) => tasks::run(args, &ctx).await,
        Commands::Schedules(args) => schedules::run(args, &ctx).await,
    }
}
