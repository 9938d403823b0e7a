//! Inbound events from the chat platform: regular messages and the two
//! slash commands.

/// A message posted in a channel the bot can see.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Platform message id, used as the reply reference.
    pub id: String,
    pub channel_id: String,
    /// Scope the channel lives in (Discord guild id).
    pub guild_id: String,
    pub content: String,
    pub author_is_bot: bool,
    /// True when the channel is a thread-type sub-channel; triggers backlog replay.
    pub is_thread: bool,
}

/// Slash commands the bot registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandName {
    Join,
    Leave,
}

impl CommandName {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "join" => Some(CommandName::Join),
            "leave" => Some(CommandName::Leave),
            _ => None,
        }
    }
}

/// A command interaction, carrying what is needed to respond to it.
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    pub name: CommandName,
    pub channel_id: String,
    pub guild_id: String,
    pub interaction_id: String,
    pub interaction_token: String,
}

/// One event delivered by the platform connector.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Message(InboundMessage),
    Command(CommandInvocation),
}
