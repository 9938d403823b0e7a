//! Backlog replay for thread-type channels.
//!
//! When a message arrives in a thread channel, the whole visible history
//! (starter message plus fetched messages) is pushed into the assistant thread
//! before the run starts, so the model sees the conversation the user sees.
//! Replay happens on every thread message; nothing records "already replayed".
//! Entries are submitted one at a time, awaited, so the assistant-side order
//! matches the channel order.

use crate::assistant::{AssistantError, ThreadsApi};

/// Build the oldest-first backlog from a thread's starter message and the
/// platform's newest-first fetch result. Blank entries are dropped.
pub fn gather_backlog(starter: Option<String>, newest_first: Vec<String>) -> Vec<String> {
    let mut ordered = Vec::with_capacity(newest_first.len() + 1);
    if let Some(s) = starter {
        ordered.push(s);
    }
    ordered.extend(newest_first.into_iter().rev());
    ordered.retain(|m| !m.trim().is_empty());
    ordered
}

/// Submit each backlog entry to the assistant thread, in order. A failure
/// aborts mid-replay and propagates; entries already submitted stay on the
/// thread.
pub async fn replay(
    api: &dyn ThreadsApi,
    thread_id: &str,
    backlog: &[String],
) -> Result<(), AssistantError> {
    for entry in backlog {
        api.add_message(thread_id, entry).await?;
    }
    Ok(())
}
