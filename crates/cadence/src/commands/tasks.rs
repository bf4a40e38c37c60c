//! Tasks command - create, inspect and control tasks.

use std::time::Duration;

use anyhow::{Result, bail};
use cadence_engine::{RunNowOutcome, StepConfig, TaskManager};
use cadence_types::TaskStatus;
use clap::{Args, Subcommand};
use serde::Serialize;

use super::{Context, fmt_time};

/// Arguments for the tasks command.
#[derive(Args, Debug)]
pub struct TasksArgs {
    #[command(subcommand)]
    pub command: Option<TasksCommand>,
}

#[derive(Subcommand, Debug)]
pub enum TasksCommand {
    /// Create a task, optionally bound to a schedule
    Create {
        /// Task name
        name: String,

        /// Step as CODEX[:async][:DELAY] (repeat for more steps, in order)
        #[arg(long = "step", required = true, value_parser = parse_step)]
        steps: Vec<StepConfig>,

        /// Repeat every N seconds (0 = run once)
        #[arg(long)]
        every: Option<u64>,

        /// Delay the first run by N seconds
        #[arg(long)]
        after: Option<u64>,

        /// Opaque metadata stored with the task
        #[arg(long, default_value = "")]
        metadata: String,
    },

    /// List tasks (default)
    List {
        /// Page number, starting at 0
        #[arg(long, default_value_t = 0)]
        page: usize,

        /// Items per page
        #[arg(long, default_value_t = cadence_engine::DEFAULT_PAGE_SIZE)]
        page_size: usize,

        /// Only tasks with schedules, one row per schedule
        #[arg(long)]
        scheduled: bool,
    },

    /// Show task status and progress
    Status {
        /// Task ID
        id: String,
    },

    /// Show execution history, newest first
    Logs {
        /// Task ID
        id: String,

        /// Maximum entries
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Cancel a task
    Stop {
        /// Task ID
        id: String,
    },

    /// Run a task now, outside its schedule
    Run {
        /// Task ID
        id: String,

        /// Keep the dispatcher running until the task leaves `running`
        #[arg(long)]
        wait: bool,

        /// Give up waiting after N seconds
        #[arg(long, default_value_t = 300)]
        wait_timeout: u64,
    },

    /// Delete a task with its steps and history
    Delete {
        /// Task ID
        id: String,
    },
}

/// Parse `CODEX[:async][:DELAY]`.
pub fn parse_step(raw: &str) -> std::result::Result<StepConfig, String> {
    let mut parts = raw.split(':');
    let codex_ref = match parts.next() {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => return Err(format!("missing codex in step '{raw}'")),
    };

    let mut step = StepConfig::sync(codex_ref);
    for part in parts {
        match part.trim() {
            "async" => step.is_async = true,
            "sync" => step.is_async = false,
            other => {
                step.run_next_after = other
                    .parse::<i64>()
                    .map_err(|_| format!("expected 'async', 'sync' or seconds in step '{raw}', got '{other}'"))?;
            }
        }
    }
    Ok(step)
}

#[derive(Debug, Serialize)]
struct CreatedOutput {
    task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    schedule_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct RunOutput {
    task_id: String,
    outcome: &'static str,
    status: TaskStatus,
    step_to_execute: usize,
}

/// Run the tasks command.
pub async fn run(args: TasksArgs, ctx: &Context) -> Result<()> {
    let manager = ctx.open_manager()?;
    let cmd = args.command.unwrap_or(TasksCommand::List {
        page: 0,
        page_size: cadence_engine::DEFAULT_PAGE_SIZE,
        scheduled: false,
    });

    match cmd {
        TasksCommand::Create {
            name,
            steps,
            every,
            after,
            metadata,
        } => {
            let output = if every.is_some() || after.is_some() {
                let created = manager.create_scheduled_task_with_metadata(
                    &name,
                    &metadata,
                    &steps,
                    i64::try_from(every.unwrap_or(0))?,
                    i64::try_from(after.unwrap_or(0))?,
                )?;
                CreatedOutput {
                    task_id: created.task_id,
                    schedule_id: Some(created.schedule_id),
                }
            } else {
                CreatedOutput {
                    task_id: manager.create_task(&name, &metadata, &steps)?,
                    schedule_id: None,
                }
            };
            if ctx.json_output {
                ctx.print_json(&output)?;
            } else {
                println!("Created task {}", output.task_id);
                if let Some(schedule_id) = output.schedule_id {
                    println!("Schedule {}", schedule_id);
                }
            }
        }
        TasksCommand::List {
            page,
            page_size,
            scheduled,
        } => {
            let page = if scheduled {
                manager.list_scheduled_tasks(page, page_size)?
            } else {
                manager.list_tasks(page, page_size)?
            };
            if ctx.json_output {
                ctx.print_json(&page)?;
            } else if page.items.is_empty() {
                println!("No tasks");
            } else {
                println!(
                    "{:<38} {:<20} {:<10} {:<18} {:<20} {:<20}",
                    "ID", "NAME", "STATUS", "INTERVAL", "LAST RUN", "NEXT RUN"
                );
                for row in &page.items {
                    let status = match row.status {
                        Some(status) => status.to_string(),
                        None => "missing".to_string(),
                    };
                    let interval = if row.disabled {
                        format!("{} (off)", row.interval)
                    } else {
                        row.interval.clone()
                    };
                    println!(
                        "{:<38} {:<20} {:<10} {:<18} {:<20} {:<20}",
                        row.task_id,
                        row.name,
                        status,
                        interval,
                        fmt_time(row.last_run),
                        fmt_time(row.next_run)
                    );
                }
                if page.has_more() {
                    println!("(more: --page {})", page.page_num + 1);
                }
            }
        }
        TasksCommand::Status { id } => {
            let report = manager.get_task_status(&id)?;
            if ctx.json_output {
                ctx.print_json(&report)?;
            } else {
                println!("Task {}", id);
                println!("  status:   {}", report.status);
                println!("  progress: {}/{}", report.step_to_execute, report.total_steps);
            }
        }
        TasksCommand::Logs { id, limit } => {
            let entries = manager.get_task_logs(&id, limit)?;
            if ctx.json_output {
                ctx.print_json(&entries)?;
            } else if entries.is_empty() {
                println!("No executions");
            } else {
                for entry in entries {
                    println!(
                        "{} {} {}",
                        fmt_time(Some(entry.created_at)),
                        entry.execution_id,
                        entry.status
                    );
                    for line in entry.logs.lines() {
                        println!("    {}", line);
                    }
                    if let Some(result) = entry.result {
                        println!("  => {}", result);
                    }
                }
            }
        }
        TasksCommand::Stop { id } => {
            manager.stop_task(&id).await?;
            if !ctx.json_output {
                println!("Task {} cancelled", id);
            }
        }
        TasksCommand::Run {
            id,
            wait,
            wait_timeout,
        } => {
            if wait {
                manager.start_dispatcher().await;
            }
            let outcome = manager.run_task_now(&id).await;
            let result = match outcome {
                Ok(outcome) => {
                    let status = if wait {
                        wait_until_settled(&manager, &id, Duration::from_secs(wait_timeout)).await
                    } else {
                        Ok(outcome.task().status)
                    };
                    status.map(|status| (outcome, status))
                }
                Err(e) => Err(e.into()),
            };
            if wait {
                manager.shutdown().await;
            }
            let (outcome, status) = result?;
            let report = manager.get_task_status(&id)?;
            let output = RunOutput {
                task_id: id,
                outcome: match outcome {
                    RunNowOutcome::Started(_) => "started",
                    RunNowOutcome::Resumed(_) => "resumed",
                    RunNowOutcome::AwaitingCompletion(_) => "awaiting_completion",
                },
                status,
                step_to_execute: report.step_to_execute,
            };
            if ctx.json_output {
                ctx.print_json(&output)?;
            } else {
                println!("{}", outcome.message());
                if wait {
                    println!("Final status: {}", status);
                }
            }
        }
        TasksCommand::Delete { id } => {
            manager.delete_task(&id).await?;
            if !ctx.json_output {
                println!("Task {} deleted", id);
            }
        }
    }

    Ok(())
}

/// Poll until the task is no longer running.
async fn wait_until_settled(
    manager: &TaskManager,
    task_id: &str,
    limit: Duration,
) -> Result<TaskStatus> {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let status = manager.get_task_status(task_id)?.status;
        if status != TaskStatus::Running {
            return Ok(status);
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("task {task_id} still running after {}s", limit.as_secs());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
