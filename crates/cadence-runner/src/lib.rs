//! Code runner client for Cadence.
//!
//! [`CodeRunner`] is the seam between the step executor and whatever
//! actually runs codex payloads. [`ProcessRunner`] shells out with
//! `tokio::process`; [`MockRunner`] is scripted for tests.

pub mod error;
pub mod mock;
pub mod process;
pub mod protocol;
pub mod runner;

pub use error::{Result, RunnerError};
pub use mock::{MockInvocation, MockOutcome, MockRunner};
pub use process::{CommandOutput, ProcessRunner, ProcessRunnerConfig};
pub use protocol::PayloadOutput;
pub use runner::{
    CodeRunner, Completion, CompletionReceiver, CompletionSender, Invocation, PendingToken,
    SyncResult, completion_channel,
};
