//! Assistant backend: HTTP client and the run-polling driver.
//!
//! Conversation state lives remotely in threads; each reply is produced by a
//! run polled to a terminal status.

mod client;
mod run;

pub use client::{AssistantClient, AssistantError};
pub use run::{await_completion, truncate_reply, PollPolicy, RunOutcome, RunStatus, ThreadsApi};
