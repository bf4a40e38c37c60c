//! Result envelope a payload may print on stdout.
//!
//! A payload that prints a single JSON object of the form
//! `{"status": "ok"|"error", "output": ..., "error": "..."}` decides its own
//! success. Anything else falls back to the process exit code.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runner::SyncResult;

/// Output envelope a payload may write to stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadOutput {
    /// "ok" or "error".
    pub status: String,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl PayloadOutput {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// Try to read an envelope from captured stdout.
    pub fn parse(stdout: &str) -> Option<Self> {
        let trimmed = stdout.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        let envelope: Self = serde_json::from_str(trimmed).ok()?;
        matches!(envelope.status.as_str(), "ok" | "error").then_some(envelope)
    }

    pub fn into_result(self) -> SyncResult {
        let ok = self.is_ok();
        let output = match self.output {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
        };
        if ok {
            SyncResult::success(output)
        } else {
            SyncResult {
                success: false,
                output,
                error: Some(
                    self.error
                        .unwrap_or_else(|| "payload reported error".to_string()),
                ),
            }
        }
    }
}
