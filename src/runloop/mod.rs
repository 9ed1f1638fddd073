//! Run loop: submit, poll at a fixed interval, gate pending tool calls
//! through an approval policy, resume, stop at a terminal status.

pub mod approval;
mod driver;
mod error;

pub use approval::{AllowListPolicy, ApprovalPolicy, AutoApprove, PromptPolicy};
pub use driver::{RetryPolicy, RunLoopDriver, RunLoopOptions, RunOutcome};
pub use error::RunLoopError;
