//! Message router: the per-message pipeline from inbound chat event to reply.
//!
//! Lookup session -> (thread channels) replay backlog, otherwise submit the
//! message -> start a run -> poll to terminal -> fetch and truncate the reply.
//! The whole pipeline holds a per-(guild, channel) lock so two messages in the
//! same channel never interleave their thread submissions or runs; distinct
//! channels proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::assistant::{await_completion, truncate_reply, PollPolicy, RunOutcome, ThreadsApi};
use crate::backlog;
use crate::channels::{ChatTransport, InboundMessage};
use crate::session::SessionStore;

/// Discord caps messages at 2000 characters.
pub const REPLY_LIMIT: usize = 2000;

const ERROR_NOTICE: &str =
    "something went wrong handling that message. check the bridge logs for details.";

/// Routes inbound messages through the session store and assistant backend.
pub struct Router {
    store: Arc<SessionStore>,
    api: Arc<dyn ThreadsApi>,
    transport: Arc<dyn ChatTransport>,
    policy: PollPolicy,
    reply_limit: usize,
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl Router {
    pub fn new(
        store: Arc<SessionStore>,
        api: Arc<dyn ThreadsApi>,
        transport: Arc<dyn ChatTransport>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            store,
            api,
            transport,
            policy,
            reply_limit: REPLY_LIMIT,
            locks: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn with_reply_limit(mut self, limit: usize) -> Self {
        self.reply_limit = limit;
        self
    }

    /// Handle one inbound message end to end. Never propagates: a channel with
    /// no session is ignored silently, and pipeline failures are logged and
    /// answered with a short notice instead of being dropped.
    pub async fn handle_message(&self, msg: InboundMessage) {
        if msg.author_is_bot || msg.content.trim().is_empty() {
            return;
        }
        let lock = self.channel_lock(&msg.guild_id, &msg.channel_id).await;
        let _serialized = lock.lock().await;

        let thread_id = match self.store.get(&msg.channel_id, &msg.guild_id).await {
            Some(t) => t,
            // Not joined: stay silent.
            None => return,
        };

        if let Err(e) = self.pipeline(&msg, &thread_id).await {
            log::warn!(
                "message handling failed in channel {}: {:#}",
                msg.channel_id,
                e
            );
            if let Err(e) = self.transport.reply(&msg.channel_id, &msg.id, ERROR_NOTICE).await {
                log::warn!("error notice failed in channel {}: {}", msg.channel_id, e);
            }
        }
    }

    async fn pipeline(&self, msg: &InboundMessage, thread_id: &str) -> anyhow::Result<()> {
        if msg.is_thread {
            // Thread channels replay the full visible history on every message;
            // the current message is part of the fetched backlog.
            let starter = self
                .transport
                .fetch_starter_message(&msg.channel_id)
                .await
                .map_err(anyhow::Error::msg)?;
            let recent = self
                .transport
                .fetch_recent_messages(&msg.channel_id)
                .await
                .map_err(anyhow::Error::msg)?;
            let entries = backlog::gather_backlog(starter, recent);
            backlog::replay(self.api.as_ref(), thread_id, &entries).await?;
        } else {
            self.api.add_message(thread_id, &msg.content).await?;
        }

        let run_id = self.api.create_run(thread_id).await?;
        let outcome =
            await_completion(self.api.as_ref(), thread_id, &run_id, &self.policy).await?;
        if outcome != RunOutcome::Completed {
            log::warn!(
                "run {} {} in channel {}",
                run_id,
                outcome.describe(),
                msg.channel_id
            );
            self.transport
                .reply(
                    &msg.channel_id,
                    &msg.id,
                    &format!("the assistant run {}; please try again.", outcome.describe()),
                )
                .await
                .map_err(anyhow::Error::msg)?;
            return Ok(());
        }

        if let Some(text) = self.api.latest_assistant_reply(thread_id).await? {
            let text = truncate_reply(&text, self.reply_limit);
            self.transport
                .reply(&msg.channel_id, &msg.id, &text)
                .await
                .map_err(anyhow::Error::msg)?;
        }
        Ok(())
    }

    /// Lock guarding the pipeline for one (guild, channel) pair. Entries are
    /// created on demand and kept for the life of the process.
    async fn channel_lock(&self, guild_id: &str, channel_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry((guild_id.to_string(), channel_id.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::{AssistantError, RunStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Fake backend: records submissions, completes every run, serves a fixed
    /// reply. Tracks concurrent in-flight submissions to catch interleaving.
    struct FakeApi {
        submitted: StdMutex<Vec<String>>,
        runs_started: AtomicUsize,
        reply: Option<String>,
        fail_submit: bool,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        submit_delay: Option<Duration>,
    }

    impl FakeApi {
        fn replying(reply: &str) -> Self {
            Self {
                submitted: StdMutex::new(Vec::new()),
                runs_started: AtomicUsize::new(0),
                reply: Some(reply.to_string()),
                fail_submit: false,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                submit_delay: None,
            }
        }
    }

    #[async_trait::async_trait]
    impl ThreadsApi for FakeApi {
        async fn create_thread(&self) -> Result<String, AssistantError> {
            Ok("thread-x".to_string())
        }

        async fn add_message(&self, _: &str, content: &str) -> Result<(), AssistantError> {
            if self.fail_submit {
                return Err(AssistantError::Api("backend down".to_string()));
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(d) = self.submit_delay {
                tokio::time::sleep(d).await;
            }
            self.submitted.lock().unwrap().push(content.to_string());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        async fn create_run(&self, _: &str) -> Result<String, AssistantError> {
            let n = self.runs_started.fetch_add(1, Ordering::SeqCst);
            Ok(format!("run-{}", n))
        }

        async fn get_run(&self, _: &str, _: &str) -> Result<RunStatus, AssistantError> {
            Ok(RunStatus::Completed)
        }

        async fn latest_assistant_reply(&self, _: &str) -> Result<Option<String>, AssistantError> {
            Ok(self.reply.clone())
        }
    }

    /// Fake platform: scripted thread history, records replies.
    #[derive(Default)]
    struct FakeTransport {
        replies: StdMutex<Vec<(String, String)>>,
        starter: Option<String>,
        recent_newest_first: Vec<String>,
    }

    #[async_trait::async_trait]
    impl ChatTransport for FakeTransport {
        async fn reply(&self, channel_id: &str, _: &str, text: &str) -> Result<(), String> {
            self.replies
                .lock()
                .unwrap()
                .push((channel_id.to_string(), text.to_string()));
            Ok(())
        }

        async fn respond(&self, _: &str, _: &str, _: &str) -> Result<(), String> {
            Ok(())
        }

        async fn fetch_starter_message(&self, _: &str) -> Result<Option<String>, String> {
            Ok(self.starter.clone())
        }

        async fn fetch_recent_messages(&self, _: &str) -> Result<Vec<String>, String> {
            Ok(self.recent_newest_first.clone())
        }
    }

    fn temp_store() -> Arc<SessionStore> {
        let dir = std::env::temp_dir().join(format!("quill-router-test-{}", uuid::Uuid::new_v4()));
        Arc::new(SessionStore::new(dir.join("sessions.json")))
    }

    fn message(content: &str) -> InboundMessage {
        InboundMessage {
            id: "m1".to_string(),
            channel_id: "chan-1".to_string(),
            guild_id: "guild-1".to_string(),
            content: content.to_string(),
            author_is_bot: false,
            is_thread: false,
        }
    }

    fn fast_policy() -> PollPolicy {
        PollPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(1),
            max_wait: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn no_session_means_no_reply_and_no_submission() {
        let api = Arc::new(FakeApi::replying("hi"));
        let transport = Arc::new(FakeTransport::default());
        let router = Router::new(temp_store(), api.clone(), transport.clone(), fast_policy());
        router.handle_message(message("hello")).await;
        assert!(transport.replies.lock().unwrap().is_empty());
        assert!(api.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn bot_and_blank_messages_are_ignored() {
        let store = temp_store();
        store.create("chan-1", "thread-x", "guild-1").await.unwrap();
        let api = Arc::new(FakeApi::replying("hi"));
        let transport = Arc::new(FakeTransport::default());
        let router = Router::new(store, api.clone(), transport.clone(), fast_policy());

        let mut from_bot = message("hello");
        from_bot.author_is_bot = true;
        router.handle_message(from_bot).await;
        router.handle_message(message("   ")).await;

        assert!(transport.replies.lock().unwrap().is_empty());
        assert!(api.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn flat_channel_submits_message_and_replies_once() {
        let store = temp_store();
        store.create("chan-1", "thread-x", "guild-1").await.unwrap();
        let api = Arc::new(FakeApi::replying("assistant says hi"));
        let transport = Arc::new(FakeTransport::default());
        let router = Router::new(store, api.clone(), transport.clone(), fast_policy());

        router.handle_message(message("hello")).await;

        assert_eq!(*api.submitted.lock().unwrap(), vec!["hello"]);
        assert_eq!(api.runs_started.load(Ordering::SeqCst), 1);
        let replies = transport.replies.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].1, "assistant says hi");
    }

    #[tokio::test]
    async fn over_limit_reply_is_truncated() {
        let store = temp_store();
        store.create("chan-1", "thread-x", "guild-1").await.unwrap();
        let api = Arc::new(FakeApi::replying(&"y".repeat(50)));
        let transport = Arc::new(FakeTransport::default());
        let router = Router::new(store, api, transport.clone(), fast_policy()).with_reply_limit(10);

        router.handle_message(message("hello")).await;

        let replies = transport.replies.lock().unwrap();
        assert_eq!(replies[0].1.chars().count(), 10);
    }

    #[tokio::test]
    async fn thread_channel_replays_backlog_instead_of_single_submit() {
        let store = temp_store();
        store.create("chan-1", "thread-x", "guild-1").await.unwrap();
        let api = Arc::new(FakeApi::replying("ok"));
        let transport = Arc::new(FakeTransport {
            starter: Some("A".to_string()),
            recent_newest_first: vec!["C".to_string(), "B".to_string()],
            ..FakeTransport::default()
        });
        let router = Router::new(store, api.clone(), transport.clone(), fast_policy());

        let mut msg = message("C");
        msg.is_thread = true;
        router.handle_message(msg).await;

        // The inbound content itself is not re-submitted; it arrives via the
        // fetched backlog.
        assert_eq!(*api.submitted.lock().unwrap(), vec!["A", "B", "C"]);
        assert_eq!(api.runs_started.load(Ordering::SeqCst), 1);
        assert_eq!(transport.replies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pipeline_error_sends_notice_instead_of_silence() {
        let store = temp_store();
        store.create("chan-1", "thread-x", "guild-1").await.unwrap();
        let api = Arc::new(FakeApi {
            fail_submit: true,
            ..FakeApi::replying("unused")
        });
        let transport = Arc::new(FakeTransport::default());
        let router = Router::new(store, api, transport.clone(), fast_policy());

        router.handle_message(message("hello")).await;

        let replies = transport.replies.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].1, ERROR_NOTICE);
    }

    #[tokio::test]
    async fn same_channel_messages_are_serialized() {
        let store = temp_store();
        store.create("chan-1", "thread-x", "guild-1").await.unwrap();
        let api = Arc::new(FakeApi {
            submit_delay: Some(Duration::from_millis(20)),
            ..FakeApi::replying("ok")
        });
        let transport = Arc::new(FakeTransport::default());
        let router = Arc::new(Router::new(
            store,
            api.clone(),
            transport,
            fast_policy(),
        ));

        let mut tasks = Vec::new();
        for i in 0..4 {
            let router = router.clone();
            tasks.push(tokio::spawn(async move {
                router.handle_message(message(&format!("msg-{}", i))).await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(api.submitted.lock().unwrap().len(), 4);
        // The per-channel lock keeps submissions to one thread sequential.
        assert_eq!(api.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
