//! Discord channel: gateway WebSocket for inbound events, REST for everything
//! outbound (replies, interaction responses, message history, command
//! registration).

use crate::channels::inbound::{ChannelEvent, CommandInvocation, CommandName, InboundMessage};
use crate::channels::transport::ChatTransport;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
const DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
/// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
const GATEWAY_INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 15);
const RECONNECT_DELAY_SECS: u64 = 5;
/// Channel types 10/11/12 are announcement/public/private threads.
const THREAD_CHANNEL_TYPES: [u8; 3] = [10, 11, 12];

/// Discord connector: maintains the gateway connection and exposes the REST
/// calls the bridge needs.
pub struct DiscordChannel {
    token: String,
    application_id: String,
    running: AtomicBool,
    client: reqwest::Client,
    /// channel id -> is-thread, filled lazily; MESSAGE_CREATE does not carry
    /// the channel type.
    thread_kinds: RwLock<HashMap<String, bool>>,
}

impl DiscordChannel {
    pub fn new(token: String, application_id: String) -> Self {
        Self {
            token,
            application_id,
            running: AtomicBool::new(false),
            client: reqwest::Client::new(),
            thread_kinds: RwLock::new(HashMap::new()),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn check(res: reqwest::Response, what: &str) -> Result<reqwest::Response, String> {
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        Err(format!("{} failed: {} {}", what, status, body))
    }

    /// Register the join/leave slash commands (global, zero-argument).
    pub async fn register_commands(&self) -> Result<(), String> {
        let url = format!(
            "{}/applications/{}/commands",
            DISCORD_API_BASE, self.application_id
        );
        let body = json!([
            { "name": "join", "description": "Activate the assistant in this channel", "type": 1 },
            { "name": "leave", "description": "Deactivate the assistant in this channel", "type": 1 },
        ]);
        let res = self
            .client
            .put(&url)
            .header("Authorization", self.auth())
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Self::check(res, "register commands").await?;
        log::info!("discord: registered join/leave commands");
        Ok(())
    }

    /// Whether a channel is a thread-type sub-channel. Looked up once via
    /// GET /channels/{id} and cached. Lookup failure counts as not-a-thread.
    async fn channel_is_thread(&self, channel_id: &str) -> bool {
        if let Some(&known) = self.thread_kinds.read().await.get(channel_id) {
            return known;
        }
        let is_thread = match self.fetch_channel(channel_id).await {
            Ok(ch) => THREAD_CHANNEL_TYPES.contains(&ch.kind),
            Err(e) => {
                log::warn!("discord: channel {} type lookup failed: {}", channel_id, e);
                return false;
            }
        };
        self.thread_kinds
            .write()
            .await
            .insert(channel_id.to_string(), is_thread);
        is_thread
    }

    async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelObject, String> {
        let url = format!("{}/channels/{}", DISCORD_API_BASE, channel_id);
        let res = self
            .client
            .get(&url)
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Self::check(res, "fetch channel")
            .await?
            .json()
            .await
            .map_err(|e| e.to_string())
    }

    /// Start the gateway loop and forward events to `event_tx`. Returns a
    /// handle to await on shutdown.
    pub fn start_inbound(
        self: Arc<Self>,
        event_tx: mpsc::Sender<ChannelEvent>,
    ) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("discord channel: starting gateway loop");
        tokio::spawn(async move {
            run_gateway_loop(self, event_tx).await;
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// One gateway connection: hello, identify, then heartbeat + dispatch
    /// until the socket drops. Returns Err to trigger a reconnect.
    async fn run_connection(
        &self,
        event_tx: &mpsc::Sender<ChannelEvent>,
    ) -> Result<(), String> {
        let (ws, _) = connect_async(DISCORD_GATEWAY_URL)
            .await
            .map_err(|e| format!("gateway connect failed: {}", e))?;
        let (mut write, mut read) = ws.split();

        let hello = loop {
            match read.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let payload: GatewayPayload =
                        serde_json::from_str(&text).map_err(|e| e.to_string())?;
                    break payload;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(format!("gateway read failed: {}", e)),
                None => return Err("gateway closed before hello".to_string()),
            }
        };
        if hello.op != 10 {
            return Err(format!("expected hello (op 10), got op {}", hello.op));
        }
        let heartbeat_ms = hello
            .d
            .get("heartbeat_interval")
            .and_then(|v| v.as_u64())
            .ok_or("hello missing heartbeat_interval")?;

        let identify = json!({
            "op": 2,
            "d": {
                "token": self.token,
                "intents": GATEWAY_INTENTS,
                "properties": { "os": "linux", "browser": "quill", "device": "quill" },
            }
        });
        write
            .send(WsMessage::Text(identify.to_string()))
            .await
            .map_err(|e| format!("identify send failed: {}", e))?;

        let mut seq: Option<u64> = None;
        let mut heartbeat =
            tokio::time::interval(std::time::Duration::from_millis(heartbeat_ms));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately; Discord wants the first beat after
        // a jittered delay, but an early beat is accepted.
        loop {
            if !self.running() {
                return Ok(());
            }
            tokio::select! {
                _ = heartbeat.tick() => {
                    let beat = json!({ "op": 1, "d": seq });
                    write
                        .send(WsMessage::Text(beat.to_string()))
                        .await
                        .map_err(|e| format!("heartbeat send failed: {}", e))?;
                }
                frame = read.next() => {
                    let text = match frame {
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Close(_))) => return Err("gateway sent close".to_string()),
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(format!("gateway read failed: {}", e)),
                        None => return Err("gateway stream ended".to_string()),
                    };
                    let payload: GatewayPayload = match serde_json::from_str(&text) {
                        Ok(p) => p,
                        Err(e) => {
                            log::debug!("discord: unparseable gateway payload: {}", e);
                            continue;
                        }
                    };
                    if let Some(s) = payload.s {
                        seq = Some(s);
                    }
                    match payload.op {
                        0 => {
                            if !self.handle_dispatch(&payload, event_tx).await {
                                // Event consumer is gone; shut the loop down.
                                self.stop();
                                return Ok(());
                            }
                        }
                        1 => {
                            let beat = json!({ "op": 1, "d": seq });
                            write
                                .send(WsMessage::Text(beat.to_string()))
                                .await
                                .map_err(|e| format!("heartbeat send failed: {}", e))?;
                        }
                        7 => return Err("gateway requested reconnect".to_string()),
                        9 => return Err("gateway invalidated session".to_string()),
                        // 11 = heartbeat ack
                        _ => {}
                    }
                }
            }
        }
    }

    /// Handle one dispatch (op 0). Returns false when the event consumer has
    /// gone away.
    async fn handle_dispatch(
        &self,
        payload: &GatewayPayload,
        event_tx: &mpsc::Sender<ChannelEvent>,
    ) -> bool {
        match payload.t.as_deref() {
            Some("READY") => {
                log::info!("discord: bot is ready");
                true
            }
            Some("MESSAGE_CREATE") => {
                let msg: MessageCreate = match serde_json::from_value(payload.d.clone()) {
                    Ok(m) => m,
                    Err(e) => {
                        log::debug!("discord: bad MESSAGE_CREATE payload: {}", e);
                        return true;
                    }
                };
                // Direct messages carry no guild id; the bridge is guild-only.
                let guild_id = match msg.guild_id {
                    Some(g) => g,
                    None => return true,
                };
                let is_thread = self.channel_is_thread(&msg.channel_id).await;
                let inbound = InboundMessage {
                    id: msg.id,
                    channel_id: msg.channel_id,
                    guild_id,
                    content: msg.content,
                    author_is_bot: msg.author.bot,
                    is_thread,
                };
                event_tx.send(ChannelEvent::Message(inbound)).await.is_ok()
            }
            Some("INTERACTION_CREATE") => {
                let interaction: InteractionCreate =
                    match serde_json::from_value(payload.d.clone()) {
                        Ok(i) => i,
                        Err(e) => {
                            log::debug!("discord: bad INTERACTION_CREATE payload: {}", e);
                            return true;
                        }
                    };
                // Type 2 = application command.
                if interaction.kind != 2 {
                    return true;
                }
                let (guild_id, channel_id) = match (interaction.guild_id, interaction.channel_id) {
                    (Some(g), Some(c)) => (g, c),
                    _ => return true,
                };
                let name = match interaction
                    .data
                    .as_ref()
                    .and_then(|d| CommandName::parse(&d.name))
                {
                    Some(n) => n,
                    None => return true,
                };
                let command = CommandInvocation {
                    name,
                    channel_id,
                    guild_id,
                    interaction_id: interaction.id,
                    interaction_token: interaction.token,
                };
                event_tx.send(ChannelEvent::Command(command)).await.is_ok()
            }
            _ => true,
        }
    }
}

async fn run_gateway_loop(channel: Arc<DiscordChannel>, event_tx: mpsc::Sender<ChannelEvent>) {
    while channel.running() {
        match channel.run_connection(&event_tx).await {
            Ok(()) => break,
            Err(e) => {
                log::warn!("discord gateway: {}; reconnecting in {}s", e, RECONNECT_DELAY_SECS);
                tokio::time::sleep(std::time::Duration::from_secs(RECONNECT_DELAY_SECS)).await;
            }
        }
    }
    log::info!("discord channel: gateway loop stopped");
}

#[async_trait]
impl ChatTransport for DiscordChannel {
    async fn reply(&self, channel_id: &str, message_id: &str, text: &str) -> Result<(), String> {
        let url = format!("{}/channels/{}/messages", DISCORD_API_BASE, channel_id);
        let body = json!({
            "content": text,
            "message_reference": { "message_id": message_id },
        });
        let res = self
            .client
            .post(&url)
            .header("Authorization", self.auth())
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Self::check(res, "reply").await?;
        Ok(())
    }

    async fn respond(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        text: &str,
    ) -> Result<(), String> {
        let url = format!(
            "{}/interactions/{}/{}/callback",
            DISCORD_API_BASE, interaction_id, interaction_token
        );
        // Type 4 = channel message with source.
        let body = json!({ "type": 4, "data": { "content": text } });
        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Self::check(res, "interaction response").await?;
        Ok(())
    }

    async fn fetch_starter_message(&self, channel_id: &str) -> Result<Option<String>, String> {
        // A thread shares its id with the starter message, which lives in the
        // parent channel.
        let channel = self.fetch_channel(channel_id).await?;
        let parent_id = match channel.parent_id {
            Some(p) => p,
            None => return Ok(None),
        };
        let url = format!(
            "{}/channels/{}/messages/{}",
            DISCORD_API_BASE, parent_id, channel_id
        );
        let res = self
            .client
            .get(&url)
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            // Starter message was deleted.
            return Ok(None);
        }
        let msg: MessageObject = Self::check(res, "fetch starter message")
            .await?
            .json()
            .await
            .map_err(|e| e.to_string())?;
        Ok(Some(msg.content))
    }

    async fn fetch_recent_messages(&self, channel_id: &str) -> Result<Vec<String>, String> {
        let url = format!(
            "{}/channels/{}/messages?limit=50",
            DISCORD_API_BASE, channel_id
        );
        let res = self
            .client
            .get(&url)
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let messages: Vec<MessageObject> = Self::check(res, "fetch messages")
            .await?
            .json()
            .await
            .map_err(|e| e.to_string())?;
        // Discord returns newest first; the backlog gatherer reverses.
        Ok(messages.into_iter().map(|m| m.content).collect())
    }
}

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: serde_json::Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageCreate {
    id: String,
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
    #[serde(default)]
    content: String,
    author: MessageAuthor,
}

#[derive(Debug, Deserialize)]
struct MessageAuthor {
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct InteractionCreate {
    id: String,
    token: String,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    guild_id: Option<String>,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    data: Option<InteractionData>,
}

#[derive(Debug, Deserialize)]
struct InteractionData {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ChannelObject {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageObject {
    #[serde(default)]
    content: String,
}
