//! The code runner contract.
//!
//! A runner executes a [`Codex`] payload either synchronously, returning the
//! result inline, or asynchronously, returning a [`PendingToken`] right away
//! and posting a [`Completion`] on the completion channel later.

use async_trait::async_trait;
use cadence_types::{CallMode, Codex};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// Correlation handle linking an async invocation to its completion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingToken(String);

impl PendingToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for PendingToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PendingToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PendingToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Outcome of a payload that ran to completion.
///
/// A payload that ran but reported failure has `success == false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Text recorded as the execution result: the output on success, the
    /// error otherwise.
    pub fn result_text(&self) -> String {
        if self.success {
            self.output.clone()
        } else {
            self.error
                .clone()
                .unwrap_or_else(|| "payload reported failure".to_string())
        }
    }
}

/// What `invoke` hands back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Completed(SyncResult),
    Pending(PendingToken),
}

/// A deferred result for an earlier async invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub token: PendingToken,
    pub result: SyncResult,
}

pub type CompletionSender = mpsc::UnboundedSender<Completion>;
pub type CompletionReceiver = mpsc::UnboundedReceiver<Completion>;

/// Create the channel async completions travel on.
pub fn completion_channel() -> (CompletionSender, CompletionReceiver) {
    mpsc::unbounded_channel()
}

/// Executes codex payloads.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    /// Run `codex` in the given mode.
    ///
    /// Sync mode resolves to [`Invocation::Completed`] or fails with
    /// `RunnerError::Execution` / `RunnerError::Timeout`. Async mode resolves
    /// to [`Invocation::Pending`] immediately.
    async fn invoke(&self, codex: &Codex, mode: CallMode) -> Result<Invocation>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_text() {
        assert_eq!(SyncResult::success("42").result_text(), "42");
        assert_eq!(SyncResult::failure("boom").result_text(), "boom");
        let bare = SyncResult {
            success: false,
            output: String::new(),
            error: None,
        };
        assert_eq!(bare.result_text(), "payload reported failure");
    }

    #[test]
    fn test_token_serializes_as_string() {
        let completion = Completion {
            token: PendingToken::new("tok-1"),
            result: SyncResult::success("ok"),
        };
        let json = serde_json::to_value(&completion).unwrap();
        assert_eq!(json["token"], "tok-1");
        assert_eq!(json["result"]["success"], true);
    }

    #[tokio::test]
    async fn test_completion_channel() {
        let (tx, mut rx) = completion_channel();
        tx.send(Completion {
            token: "t".into(),
            result: SyncResult::success(""),
        })
        .unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.token.as_str(), "t");
    }
}
