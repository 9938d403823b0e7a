//! Outbound side of the chat platform, as a trait so the router and lifecycle
//! controller can run against a fake in tests.

use async_trait::async_trait;

/// Calls the bridge makes back into the chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Post `text` in `channel_id` as a reply to message `message_id`.
    async fn reply(&self, channel_id: &str, message_id: &str, text: &str) -> Result<(), String>;

    /// Respond to a command interaction with a plain text message.
    async fn respond(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        text: &str,
    ) -> Result<(), String>;

    /// Content of the message a thread-type channel was started from, when it
    /// still exists.
    async fn fetch_starter_message(&self, channel_id: &str) -> Result<Option<String>, String>;

    /// Contents of the channel's recent messages in the platform's native
    /// newest-first order.
    async fn fetch_recent_messages(&self, channel_id: &str) -> Result<Vec<String>, String>;
}
