//! Schedules command - enable, disable and remove schedules.

use anyhow::Result;
use clap::{Args, Subcommand};

use super::{Context, fmt_time};

/// Arguments for the schedules command.
#[derive(Args, Debug)]
pub struct SchedulesArgs {
    #[command(subcommand)]
    pub command: SchedulesCommand,
}

#[derive(Subcommand, Debug)]
pub enum SchedulesCommand {
    /// Show one schedule
    Show {
        /// Schedule ID
        id: String,
    },

    /// Enable or disable a schedule
    Toggle {
        /// Schedule ID
        id: String,

        /// `true` to disable, `false` to enable
        #[arg(long, action = clap::ArgAction::Set)]
        disabled: bool,
    },

    /// Delete a schedule (the task is kept)
    Delete {
        /// Schedule ID
        id: String,
    },
}

/// Run the schedules command.
pub async fn run(args: SchedulesArgs, ctx: &Context) -> Result<()> {
    let manager = ctx.open_manager()?;

    match args.command {
        SchedulesCommand::Show { id } => {
            let schedule = manager.get_schedule(&id)?;
            if ctx.json_output {
                ctx.print_json(&schedule)?;
            } else {
                println!("Schedule {}", schedule.id);
                println!("  task:     {}", schedule.task_id);
                println!("  interval: {}", schedule.interval_label());
                println!("  disabled: {}", schedule.disabled);
                println!("  last run: {}", fmt_time(schedule.last_run_at));
                println!("  next run: {}", fmt_time(schedule.next_run_at));
            }
        }
        SchedulesCommand::Toggle { id, disabled } => {
            manager.toggle_schedule(&id, disabled)?;
            if !ctx.json_output {
                let state = if disabled { "disabled" } else { "enabled" };
                println!("Schedule {} {}", id, state);
            }
        }
        SchedulesCommand::Delete { id } => {
            manager.delete_schedule(&id)?;
            if !ctx.json_output {
                println!("Schedule {} deleted", id);
            }
        }
    }

    Ok(())
}
