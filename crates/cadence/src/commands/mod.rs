//! CLI command handlers.

pub mod codex;
pub mod schedules;
pub mod serve;
pub mod tasks;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use cadence_config::{CadenceConfig, LoadedConfig};
use cadence_engine::{DispatcherConfig, TaskManager, TaskManagerConfig};
use cadence_runner::{ProcessRunner, ProcessRunnerConfig, completion_channel};
use cadence_store::TaskStore;
use serde::Serialize;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Merged configuration.
    pub config: CadenceConfig,
    /// Config files that were actually read.
    pub config_sources: Vec<PathBuf>,
    /// Resolved database path.
    pub db_path: PathBuf,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    pub fn new(
        loaded: LoadedConfig,
        db_override: Option<PathBuf>,
        json_output: bool,
        verbose: bool,
    ) -> Result<Self> {
        let config_sources = loaded
            .loaded_from()
            .into_iter()
            .map(|p| p.to_path_buf())
            .collect();
        let db_path = db_override
            .or_else(|| loaded.config.store().db_path)
            .or_else(|| cadence_config::xdg_data_dir().map(|d| d.join("cadence.db")))
            .ok_or_else(|| anyhow!("no database path: pass --db or set [store] db_path"))?;
        Ok(Self {
            config: loaded.config,
            config_sources,
            db_path,
            json_output,
            verbose,
        })
    }

    /// Open the store and wire a task manager backed by the process runner.
    ///
    /// The dispatcher is not started; `serve` and `tasks run --wait` start it
    /// explicitly.
    pub fn open_manager(&self) -> Result<TaskManager> {
        let store = Arc::new(TaskStore::open(&self.db_path)?);

        let runner_section = self.config.runner();
        let scheduler = self.config.scheduler();
        // Async payloads get the same window the dispatcher waits for them.
        let mut runner_config = ProcessRunnerConfig::default()
            .with_sync_timeout(runner_section.sync_timeout())
            .with_async_timeout(scheduler.async_timeout());
        if let Some(shell) = runner_section.shell {
            runner_config = runner_config.with_shell(shell);
        }
        if let Some(dir) = runner_section.working_dir {
            runner_config = runner_config.with_working_dir(dir);
        }
        for (key, value) in runner_section.env {
            runner_config = runner_config.with_env(key, value);
        }

        let (tx, rx) = completion_channel();
        let runner = Arc::new(ProcessRunner::new(runner_config, tx));

        let config = TaskManagerConfig {
            dispatcher: DispatcherConfig {
                tick_interval: scheduler.tick_interval(),
                async_timeout: scheduler.async_timeout(),
            },
            autostart: scheduler.autostart,
        };
        Ok(TaskManager::new(store, runner, config).with_completions(rx))
    }

    /// Print a value as pretty JSON.
    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// Render an optional timestamp for tables.
pub(crate) fn fmt_time(ts: Option<cadence_types::Timestamp>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
