//! Session lifecycle: the join and leave commands.
//!
//! join allocates a fresh assistant thread and persists the binding; leave
//! drops the binding (the remote thread is unlinked, not destroyed). Both
//! always answer the interaction, reporting failure instead of staying silent.

use std::sync::Arc;

use crate::assistant::ThreadsApi;
use crate::channels::{ChatTransport, CommandInvocation, CommandName};
use crate::session::SessionStore;

const JOINED_REPLY: &str =
    "Quill is now active in this channel! I will respond to messages here.";
const LEFT_REPLY: &str = "Quill has left this channel. Use /join to reactivate me here.";
const JOIN_FAILED_REPLY: &str = "Failed to join the channel.";
const LEAVE_FAILED_REPLY: &str = "Failed to leave the channel.";

/// Handles join/leave interactions against the store and assistant backend.
pub struct LifecycleController {
    store: Arc<SessionStore>,
    api: Arc<dyn ThreadsApi>,
    transport: Arc<dyn ChatTransport>,
}

impl LifecycleController {
    pub fn new(
        store: Arc<SessionStore>,
        api: Arc<dyn ThreadsApi>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            store,
            api,
            transport,
        }
    }

    /// Run one command and answer the interaction. Errors are converted into
    /// a failure reply; only the reply itself failing is left to the log.
    pub async fn handle_command(&self, cmd: CommandInvocation) {
        let result = match cmd.name {
            CommandName::Join => self.join(&cmd).await,
            CommandName::Leave => self.leave(&cmd).await,
        };
        let text = match (&result, cmd.name) {
            (Ok(()), CommandName::Join) => JOINED_REPLY,
            (Ok(()), CommandName::Leave) => LEFT_REPLY,
            (Err(e), CommandName::Join) => {
                log::warn!("join failed in channel {}: {}", cmd.channel_id, e);
                JOIN_FAILED_REPLY
            }
            (Err(e), CommandName::Leave) => {
                log::warn!("leave failed in channel {}: {}", cmd.channel_id, e);
                LEAVE_FAILED_REPLY
            }
        };
        if let Err(e) = self
            .transport
            .respond(&cmd.interaction_id, &cmd.interaction_token, text)
            .await
        {
            log::warn!("command response failed in channel {}: {}", cmd.channel_id, e);
        }
    }

    /// Allocate a new assistant thread and bind it to the channel. An existing
    /// binding is replaced; its old thread is orphaned on purpose. If the
    /// store write fails the new thread is never referenced anywhere, so it
    /// stays inert remotely.
    async fn join(&self, cmd: &CommandInvocation) -> anyhow::Result<()> {
        let thread_id = self.api.create_thread().await?;
        self.store
            .create(&cmd.channel_id, &thread_id, &cmd.guild_id)
            .await?;
        log::info!(
            "joined channel {} (guild {}), thread {}",
            cmd.channel_id,
            cmd.guild_id,
            thread_id
        );
        Ok(())
    }

    /// Drop the channel's binding. Leaving a channel with no session is a
    /// successful no-op.
    async fn leave(&self, cmd: &CommandInvocation) -> anyhow::Result<()> {
        self.store.remove(&cmd.channel_id, &cmd.guild_id).await?;
        log::info!("left channel {} (guild {})", cmd.channel_id, cmd.guild_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::{AssistantError, RunStatus};
    use std::sync::Mutex;

    struct FakeApi {
        next_thread: Mutex<Vec<String>>,
        fail_create: bool,
    }

    impl FakeApi {
        fn with_threads(ids: &[&str]) -> Self {
            Self {
                next_thread: Mutex::new(ids.iter().rev().map(|s| s.to_string()).collect()),
                fail_create: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl ThreadsApi for FakeApi {
        async fn create_thread(&self) -> Result<String, AssistantError> {
            if self.fail_create {
                return Err(AssistantError::Api("boom".to_string()));
            }
            Ok(self
                .next_thread
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| "thread-default".to_string()))
        }

        async fn add_message(&self, _: &str, _: &str) -> Result<(), AssistantError> {
            Ok(())
        }

        async fn create_run(&self, _: &str) -> Result<String, AssistantError> {
            Ok("run-x".to_string())
        }

        async fn get_run(&self, _: &str, _: &str) -> Result<RunStatus, AssistantError> {
            Ok(RunStatus::Completed)
        }

        async fn latest_assistant_reply(&self, _: &str) -> Result<Option<String>, AssistantError> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        responses: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ChatTransport for FakeTransport {
        async fn reply(&self, _: &str, _: &str, _: &str) -> Result<(), String> {
            Ok(())
        }

        async fn respond(&self, _: &str, _: &str, text: &str) -> Result<(), String> {
            self.responses.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn fetch_starter_message(&self, _: &str) -> Result<Option<String>, String> {
            Ok(None)
        }

        async fn fetch_recent_messages(&self, _: &str) -> Result<Vec<String>, String> {
            Ok(Vec::new())
        }
    }

    fn temp_store() -> Arc<SessionStore> {
        let dir =
            std::env::temp_dir().join(format!("quill-lifecycle-test-{}", uuid::Uuid::new_v4()));
        Arc::new(SessionStore::new(dir.join("sessions.json")))
    }

    fn command(name: CommandName) -> CommandInvocation {
        CommandInvocation {
            name,
            channel_id: "chan-1".to_string(),
            guild_id: "guild-1".to_string(),
            interaction_id: "i1".to_string(),
            interaction_token: "tok".to_string(),
        }
    }

    #[tokio::test]
    async fn join_persists_session_and_confirms() {
        let store = temp_store();
        let transport = Arc::new(FakeTransport::default());
        let controller = LifecycleController::new(
            store.clone(),
            Arc::new(FakeApi::with_threads(&["thread-a"])),
            transport.clone(),
        );
        controller.handle_command(command(CommandName::Join)).await;
        assert_eq!(
            store.get("chan-1", "guild-1").await.as_deref(),
            Some("thread-a")
        );
        assert_eq!(*transport.responses.lock().unwrap(), vec![JOINED_REPLY]);
    }

    #[tokio::test]
    async fn second_join_replaces_thread() {
        let store = temp_store();
        let transport = Arc::new(FakeTransport::default());
        let controller = LifecycleController::new(
            store.clone(),
            Arc::new(FakeApi::with_threads(&["thread-a", "thread-b"])),
            transport,
        );
        controller.handle_command(command(CommandName::Join)).await;
        controller.handle_command(command(CommandName::Join)).await;
        assert_eq!(
            store.get("chan-1", "guild-1").await.as_deref(),
            Some("thread-b")
        );
    }

    #[tokio::test]
    async fn leave_removes_session_and_confirms() {
        let store = temp_store();
        let transport = Arc::new(FakeTransport::default());
        let controller = LifecycleController::new(
            store.clone(),
            Arc::new(FakeApi::with_threads(&["thread-a"])),
            transport.clone(),
        );
        controller.handle_command(command(CommandName::Join)).await;
        controller.handle_command(command(CommandName::Leave)).await;
        assert_eq!(store.get("chan-1", "guild-1").await, None);
        assert_eq!(
            transport.responses.lock().unwrap().last().map(String::as_str),
            Some(LEFT_REPLY)
        );
    }

    #[tokio::test]
    async fn leave_without_session_still_confirms() {
        let store = temp_store();
        let transport = Arc::new(FakeTransport::default());
        let controller = LifecycleController::new(
            store,
            Arc::new(FakeApi::with_threads(&[])),
            transport.clone(),
        );
        controller.handle_command(command(CommandName::Leave)).await;
        assert_eq!(*transport.responses.lock().unwrap(), vec![LEFT_REPLY]);
    }

    #[tokio::test]
    async fn join_failure_reports_to_user() {
        let store = temp_store();
        let transport = Arc::new(FakeTransport::default());
        let api = FakeApi {
            next_thread: Mutex::new(Vec::new()),
            fail_create: true,
        };
        let controller =
            LifecycleController::new(store.clone(), Arc::new(api), transport.clone());
        controller.handle_command(command(CommandName::Join)).await;
        assert_eq!(store.get("chan-1", "guild-1").await, None);
        assert_eq!(*transport.responses.lock().unwrap(), vec![JOIN_FAILED_REPLY]);
    }
}
