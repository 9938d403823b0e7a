//! Run driver: submit content to a thread, start a run, poll to a terminal
//! status with backoff and a wait ceiling.
//!
//! Polling starts at the configured interval and doubles up to a cap; a run
//! that is still not terminal at the ceiling yields `RunOutcome::TimedOut`
//! instead of looping forever. Submissions to one thread must be awaited
//! sequentially by the caller; the backend does not tolerate interleaving.

use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tokio::time::Instant;

use super::client::AssistantError;

/// Remote run status as reported by the backend. Exactly four states are
/// terminal; anything else (including statuses added later) keeps polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Expired,
    /// Status string this version does not know; never terminal.
    Unknown,
}

impl RunStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => RunStatus::Queued,
            "in_progress" => RunStatus::InProgress,
            "requires_action" => RunStatus::RequiresAction,
            "cancelling" => RunStatus::Cancelling,
            "cancelled" => RunStatus::Cancelled,
            "failed" => RunStatus::Failed,
            "completed" => RunStatus::Completed,
            "expired" => RunStatus::Expired,
            _ => RunStatus::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Cancelled | RunStatus::Failed | RunStatus::Completed | RunStatus::Expired
        )
    }
}

impl<'de> Deserialize<'de> for RunStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(RunStatus::parse(&s))
    }
}

/// How a run ended, as seen by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed,
    Expired,
    /// Still not terminal when the poll ceiling was reached.
    TimedOut,
}

impl RunOutcome {
    /// Short human-readable form for logs and user notices.
    pub fn describe(self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Cancelled => "cancelled",
            RunOutcome::Failed => "failed",
            RunOutcome::Expired => "expired",
            RunOutcome::TimedOut => "timed out",
        }
    }
}

/// Poll pacing for [`await_completion`].
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Delay before the second status check; doubles each round.
    pub initial_interval: Duration,
    /// Cap on the per-round delay.
    pub max_interval: Duration,
    /// Total time budget before giving up with `TimedOut`.
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            max_wait: Duration::from_secs(120),
        }
    }
}

/// Thread/run operations on the assistant backend. Implemented by
/// `AssistantClient`; tests substitute fakes.
#[async_trait::async_trait]
pub trait ThreadsApi: Send + Sync {
    async fn create_thread(&self) -> Result<String, AssistantError>;
    /// Append one user message. Content must be non-empty; submissions to the
    /// same thread must be sequential.
    async fn add_message(&self, thread_id: &str, content: &str) -> Result<(), AssistantError>;
    /// Start processing everything submitted so far; returns the run id.
    async fn create_run(&self, thread_id: &str) -> Result<String, AssistantError>;
    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<RunStatus, AssistantError>;
    /// Text of the newest assistant-authored message, if any.
    async fn latest_assistant_reply(
        &self,
        thread_id: &str,
    ) -> Result<Option<String>, AssistantError>;
}

/// Poll a run until it reaches a terminal status or the time budget runs out.
/// Backend errors during a poll propagate; they do not count as an outcome.
pub async fn await_completion(
    api: &dyn ThreadsApi,
    thread_id: &str,
    run_id: &str,
    policy: &PollPolicy,
) -> Result<RunOutcome, AssistantError> {
    let started = Instant::now();
    let mut interval = policy.initial_interval;
    loop {
        let status = api.get_run(thread_id, run_id).await?;
        match status {
            RunStatus::Completed => return Ok(RunOutcome::Completed),
            RunStatus::Cancelled => return Ok(RunOutcome::Cancelled),
            RunStatus::Failed => return Ok(RunOutcome::Failed),
            RunStatus::Expired => return Ok(RunOutcome::Expired),
            _ => {}
        }
        if started.elapsed() + interval > policy.max_wait {
            log::warn!(
                "run {}: not terminal after {:?}, giving up (last status {:?})",
                run_id,
                policy.max_wait,
                status
            );
            return Ok(RunOutcome::TimedOut);
        }
        tokio::time::sleep(interval).await;
        interval = (interval * 2).min(policy.max_interval);
    }
}

/// Cut a reply down to the platform's message length limit. Counts characters,
/// not bytes, so multi-byte text is never split mid-character.
pub fn truncate_reply(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect()
}
