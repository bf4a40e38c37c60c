//! Runner that executes codex payloads as shell scripts.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_types::{CallMode, Codex, new_id};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Result, RunnerError};
use crate::protocol::PayloadOutput;
use crate::runner::{CodeRunner, Completion, CompletionSender, Invocation, PendingToken, SyncResult};

/// Default budget for a synchronous invocation.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for [`ProcessRunner`].
#[derive(Debug, Clone)]
pub struct ProcessRunnerConfig {
    /// Shell binary; falls back to `$SHELL`, then `/bin/sh`.
    pub shell: Option<String>,
    /// Budget applied to synchronous invocations.
    pub sync_timeout: Duration,
    /// Budget for async invocations. An overrun kills the process and posts
    /// a timeout failure. `None` lets it run until it exits.
    pub async_timeout: Option<Duration>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl Default for ProcessRunnerConfig {
    fn default() -> Self {
        Self {
            shell: None,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            async_timeout: None,
            working_dir: None,
            env: BTreeMap::new(),
        }
    }
}

impl ProcessRunnerConfig {
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub fn with_sync_timeout(mut self, budget: Duration) -> Self {
        self.sync_timeout = budget;
        self
    }

    pub fn with_async_timeout(mut self, budget: Duration) -> Self {
        self.async_timeout = Some(budget);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn resolve_shell(&self) -> String {
        self.shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/sh".to_string())
    }
}

/// Output captured from a payload process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,
}

impl CommandOutput {
    /// Combine stdout and stderr for display.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n\n--- stderr ---\n{}", self.stdout, self.stderr)
        }
    }

    /// Interpret the output: a JSON envelope on stdout wins, otherwise the
    /// exit code decides.
    pub fn into_result(self) -> SyncResult {
        if let Some(envelope) = PayloadOutput::parse(&self.stdout) {
            return envelope.into_result();
        }
        if self.exit_code == 0 {
            SyncResult::success(self.stdout.trim_end().to_string())
        } else {
            SyncResult {
                success: false,
                output: self.stdout.trim_end().to_string(),
                error: Some(format!(
                    "ExecutionError: exit code {}: {}",
                    self.exit_code,
                    self.stderr.trim_end()
                )),
            }
        }
    }
}

/// Runs codex payloads with `<shell> -c <payload>`.
///
/// Async invocations run on a background tokio task and report through the
/// completion channel.
#[derive(Clone)]
pub struct ProcessRunner {
    config: Arc<ProcessRunnerConfig>,
    completions: CompletionSender,
}

impl ProcessRunner {
    pub fn new(config: ProcessRunnerConfig, completions: CompletionSender) -> Self {
        Self {
            config: Arc::new(config),
            completions,
        }
    }

    pub fn config(&self) -> &ProcessRunnerConfig {
        &self.config
    }

    /// Execute a payload, optionally within a time budget.
    pub async fn execute(
        config: &ProcessRunnerConfig,
        payload: &str,
        budget: Option<Duration>,
    ) -> Result<CommandOutput> {
        let shell = config.resolve_shell();

        let mut cmd = Command::new(&shell);
        cmd.arg("-c").arg(payload);
        if let Some(ref dir) = config.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| RunnerError::Spawn(format!("{shell}: {e}")))?;

        let output = match budget {
            Some(budget) => timeout(budget, child.wait_with_output())
                .await
                .map_err(|_| RunnerError::Timeout(budget))??,
            None => child.wait_with_output().await?,
        };

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    fn spawn_async(&self, codex: &Codex) -> PendingToken {
        let token = PendingToken::new(new_id());
        let config = Arc::clone(&self.config);
        let completions = self.completions.clone();
        let payload = codex.payload.clone();
        let codex_name = codex.name.clone();
        let sent_token = token.clone();

        tokio::spawn(async move {
            let result = match Self::execute(&config, &payload, config.async_timeout).await {
                Ok(output) => output.into_result(),
                Err(e) => SyncResult::failure(e.to_string()),
            };
            debug!(codex = %codex_name, token = %sent_token, success = result.success, "Async payload finished");
            if completions
                .send(Completion {
                    token: sent_token.clone(),
                    result,
                })
                .is_err()
            {
                warn!(token = %sent_token, "Completion channel closed; result dropped");
            }
        });

        token
    }
}

#[async_trait]
impl CodeRunner for ProcessRunner {
    async fn invoke(&self, codex: &Codex, mode: CallMode) -> Result<Invocation> {
        match mode {
            CallMode::Sync => {
                debug!(codex = %codex.name, "Running payload");
                let output =
                    Self::execute(&self.config, &codex.payload, Some(self.config.sync_timeout))
                        .await?;
                Ok(Invocation::Completed(output.into_result()))
            }
            CallMode::Async => {
                let token = self.spawn_async(codex);
                debug!(codex = %codex.name, token = %token, "Submitted async payload");
                Ok(Invocation::Pending(token))
            }
        }
    }
}
