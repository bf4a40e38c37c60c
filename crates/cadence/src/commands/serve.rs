//! Serve command - runs the timer dispatcher in the foreground.

use anyhow::Result;
use cadence_engine::TickReport;
use clap::Args;
use serde::Serialize;
use tracing::info;

use super::Context;

/// Arguments for the serve command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Run a single dispatcher pass and exit
    #[arg(long)]
    pub once: bool,
}

/// Outcome of `serve --once`.
#[derive(Debug, Serialize)]
struct PassReport {
    /// Stalled tasks resumed before the tick.
    recovered: usize,
    #[serde(flatten)]
    tick: TickReport,
}

/// Run the serve command.
pub async fn run(args: ServeArgs, ctx: &Context) -> Result<()> {
    let manager = ctx.open_manager()?;

    if ctx.verbose {
        for source in &ctx.config_sources {
            println!("Loaded config: {}", source.display());
        }
        println!("Database: {}", ctx.db_path.display());
    }

    if args.once {
        let recovered = manager.recover_stalled().await;
        let report = PassReport {
            recovered,
            tick: manager.tick(cadence_types::now()).await,
        };
        if ctx.json_output {
            ctx.print_json(&report)?;
        } else {
            let tick = &report.tick;
            println!(
                "recovered={} dispatched={} resumed={} timed_out={} skipped={} errors={}",
                report.recovered,
                tick.dispatched,
                tick.resumed,
                tick.timed_out,
                tick.skipped,
                tick.errors
            );
        }
        return Ok(());
    }

    manager.start_dispatcher().await;
    let scheduler = ctx.config.scheduler();
    info!(
        db = %ctx.db_path.display(),
        tick_secs = scheduler.tick_interval_secs,
        async_timeout_secs = scheduler.async_timeout_secs,
        "Cadence serving"
    );
    if !ctx.json_output {
        println!("Cadence dispatcher running. Press Ctrl-C to stop.");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    manager.shutdown().await;
    Ok(())
}
