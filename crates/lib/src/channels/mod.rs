//! Chat platform side of the bridge.
//!
//! Event types, the outbound transport trait, and the Discord connector that
//! implements both ends (gateway WebSocket in, REST out).

mod discord;
mod inbound;
mod transport;

pub use discord::DiscordChannel;
pub use inbound::{ChannelEvent, CommandInvocation, CommandName, InboundMessage};
pub use transport::ChatTransport;
