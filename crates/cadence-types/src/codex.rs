//! Executable payloads and the calls that invoke them.

use serde::{Deserialize, Serialize};

use crate::{Id, Timestamp};

/// A named, immutable unit of executable source.
///
/// New versions are new records; a codex is never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Codex {
    pub id: Id,
    pub name: String,
    pub payload: String,
    /// Hex-encoded SHA-256 of `payload`.
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: Timestamp,
}

/// How a call yields its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMode {
    /// Result is returned by the invocation itself.
    Sync,
    /// Invocation returns a correlation token; the result arrives later.
    Async,
}

impl CallMode {
    pub fn from_is_async(is_async: bool) -> Self {
        if is_async { Self::Async } else { Self::Sync }
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
        }
    }
}

impl std::fmt::Display for CallMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CallMode {
    type Err = crate::ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            other => Err(crate::ParseStatusError::new("call mode", other)),
        }
    }
}

/// An invocation binding one codex to an execution mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub id: Id,
    pub codex_id: Id,
    pub mode: CallMode,
}

impl Call {
    pub fn is_async(&self) -> bool {
        self.mode.is_async()
    }
}
