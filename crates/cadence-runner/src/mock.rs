//! Scripted runner for tests.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use cadence_types::{CallMode, Codex};
use parking_lot::Mutex;

use crate::error::{Result, RunnerError};
use crate::runner::{CodeRunner, Completion, CompletionSender, Invocation, PendingToken, SyncResult};

/// What a scripted codex does when invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    /// Payload runs and reports success with this output.
    Succeed(String),
    /// Payload runs and reports failure with this error.
    Fail(String),
    /// Payload raises; surfaces as `RunnerError::Execution` in sync mode.
    Raise(String),
    /// Sync budget exceeded; surfaces as `RunnerError::Timeout`.
    Timeout,
}

impl MockOutcome {
    fn to_result(&self) -> SyncResult {
        match self {
            Self::Succeed(output) => SyncResult::success(output.clone()),
            Self::Fail(error) => SyncResult::failure(error.clone()),
            Self::Raise(error) => SyncResult::failure(format!("ExecutionError: {error}")),
            Self::Timeout => SyncResult::failure("TimeoutError: execution budget exceeded"),
        }
    }
}

/// One recorded `invoke` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockInvocation {
    pub codex_name: String,
    pub mode: CallMode,
    pub token: Option<PendingToken>,
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<String, MockOutcome>,
    invocations: Vec<MockInvocation>,
    // BTreeMap so tokens drain in issue order.
    pending: BTreeMap<u64, (PendingToken, SyncResult)>,
    next_token: u64,
}

/// Runner whose outcomes are scripted per codex name.
///
/// Unscripted codices succeed with empty output. Async invocations hand out
/// tokens `mock-1`, `mock-2`, ... and hold the scripted result until a test
/// calls [`MockRunner::complete`] or [`MockRunner::complete_all`]. Never
/// completing a token simulates a lost completion.
#[derive(Default)]
pub struct MockRunner {
    state: Mutex<MockState>,
    completions: Option<CompletionSender>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver completions through `sender` instead of returning them.
    pub fn with_completions(mut self, sender: CompletionSender) -> Self {
        self.completions = Some(sender);
        self
    }

    /// Script the outcome for a codex name.
    pub fn script(&self, codex_name: impl Into<String>, outcome: MockOutcome) -> &Self {
        self.state.lock().scripts.insert(codex_name.into(), outcome);
        self
    }

    pub fn succeed(&self, codex_name: impl Into<String>, output: impl Into<String>) -> &Self {
        self.script(codex_name, MockOutcome::Succeed(output.into()))
    }

    pub fn fail(&self, codex_name: impl Into<String>, error: impl Into<String>) -> &Self {
        self.script(codex_name, MockOutcome::Fail(error.into()))
    }

    pub fn raise(&self, codex_name: impl Into<String>, error: impl Into<String>) -> &Self {
        self.script(codex_name, MockOutcome::Raise(error.into()))
    }

    pub fn invocations(&self) -> Vec<MockInvocation> {
        self.state.lock().invocations.clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.state.lock().invocations.len()
    }

    /// Tokens still waiting for a completion, oldest first.
    pub fn pending_tokens(&self) -> Vec<PendingToken> {
        self.state
            .lock()
            .pending
            .values()
            .map(|(token, _)| token.clone())
            .collect()
    }

    /// Release the scripted completion for `token`.
    ///
    /// Sends it on the completion channel when one is attached; always
    /// returns it. `None` if the token is unknown or already completed.
    pub fn complete(&self, token: &PendingToken) -> Option<Completion> {
        let entry = {
            let mut state = self.state.lock();
            let key = state
                .pending
                .iter()
                .find(|(_, (t, _))| t == token)
                .map(|(k, _)| *k)?;
            state.pending.remove(&key)
        };
        let (token, result) = entry?;
        Some(self.deliver(Completion { token, result }))
    }

    /// Release every outstanding completion in issue order.
    pub fn complete_all(&self) -> Vec<Completion> {
        let drained: Vec<_> = std::mem::take(&mut self.state.lock().pending)
            .into_values()
            .collect();
        drained
            .into_iter()
            .map(|(token, result)| self.deliver(Completion { token, result }))
            .collect()
    }

    fn deliver(&self, completion: Completion) -> Completion {
        if let Some(ref sender) = self.completions {
            let _ = sender.send(completion.clone());
        }
        completion
    }
}

#[async_trait]
impl CodeRunner for MockRunner {
    async fn invoke(&self, codex: &Codex, mode: CallMode) -> Result<Invocation> {
        let mut state = self.state.lock();
        let outcome = state
            .scripts
            .get(&codex.name)
            .cloned()
            .unwrap_or_else(|| MockOutcome::Succeed(String::new()));

        match mode {
            CallMode::Sync => {
                state.invocations.push(MockInvocation {
                    codex_name: codex.name.clone(),
                    mode,
                    token: None,
                });
                match outcome {
                    MockOutcome::Raise(error) => Err(RunnerError::Execution(error)),
                    MockOutcome::Timeout => Err(RunnerError::Timeout(Duration::from_secs(30))),
                    other => Ok(Invocation::Completed(other.to_result())),
                }
            }
            CallMode::Async => {
                state.next_token += 1;
                let seq = state.next_token;
                let token = PendingToken::new(format!("mock-{seq}"));
                state.invocations.push(MockInvocation {
                    codex_name: codex.name.clone(),
                    mode,
                    token: Some(token.clone()),
                });
                state
                    .pending
                    .insert(seq, (token.clone(), outcome.to_result()));
                Ok(Invocation::Pending(token))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::completion_channel;
    use cadence_types::now;

    fn codex(name: &str) -> Codex {
        Codex {
            id: format!("id-{name}"),
            name: name.to_string(),
            payload: String::new(),
            checksum: String::new(),
            description: None,
            created_at: now(),
        }
    }

    #[tokio::test]
    async fn test_unscripted_succeeds() {
        let runner = MockRunner::new();
        let inv = runner.invoke(&codex("a"), CallMode::Sync).await.unwrap();
        assert_eq!(inv, Invocation::Completed(SyncResult::success("")));
        assert_eq!(runner.invocation_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_outcomes() {
        let runner = MockRunner::new();
        runner.fail("f", "nope").raise("r", "kaboom");
        runner.script("slow", MockOutcome::Timeout);

        let inv = runner.invoke(&codex("f"), CallMode::Sync).await.unwrap();
        assert_eq!(inv, Invocation::Completed(SyncResult::failure("nope")));

        let err = runner.invoke(&codex("r"), CallMode::Sync).await.unwrap_err();
        assert!(matches!(err, RunnerError::Execution(ref m) if m == "kaboom"));

        let err = runner.invoke(&codex("slow"), CallMode::Sync).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_async_tokens_are_deterministic() {
        let runner = MockRunner::new();
        runner.succeed("a", "done");
        let first = runner.invoke(&codex("a"), CallMode::Async).await.unwrap();
        let second = runner.invoke(&codex("a"), CallMode::Async).await.unwrap();
        assert_eq!(first, Invocation::Pending(PendingToken::new("mock-1")));
        assert_eq!(second, Invocation::Pending(PendingToken::new("mock-2")));
        assert_eq!(runner.pending_tokens().len(), 2);

        let completion = runner.complete(&PendingToken::new("mock-1")).unwrap();
        assert_eq!(completion.result, SyncResult::success("done"));
        assert!(runner.complete(&PendingToken::new("mock-1")).is_none());
        assert_eq!(runner.pending_tokens(), vec![PendingToken::new("mock-2")]);
    }

    #[tokio::test]
    async fn test_complete_all_sends_on_channel() {
        let (tx, mut rx) = completion_channel();
        let runner = MockRunner::new().with_completions(tx);
        runner.invoke(&codex("a"), CallMode::Async).await.unwrap();
        runner.invoke(&codex("b"), CallMode::Async).await.unwrap();

        let delivered = runner.complete_all();
        assert_eq!(delivered.len(), 2);
        assert_eq!(rx.recv().await.unwrap().token.as_str(), "mock-1");
        assert_eq!(rx.recv().await.unwrap().token.as_str(), "mock-2");
        assert!(runner.pending_tokens().is_empty());
    }
}
