//! Shared fixture for the integration suite: an in-process runtime wired to
//! a recording transport, an in-memory KV, and a throwaway SQLite file.

use async_trait::async_trait;
use interchatd::config::Config;
use interchatd::db::{ConnectionRecord, Database, HubRecord};
use interchatd::kv::memory::MemoryKv;
use interchatd::transport::{
    AuthorSnapshot, ChannelInfo, ChatTransport, MessageSnapshot, TransportError, WEBHOOK_NAME,
    WebhookInfo, WebhookPayload,
};
use interchatd::{Runtime, RuntimeParams};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One captured webhook dispatch.
#[derive(Debug, Clone)]
pub struct SentWebhook {
    pub url: String,
    pub payload: WebhookPayload,
}

/// Failure injected for a webhook URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum InjectedFailure {
    Gone,
    Server,
}

/// Transport double recording every outbound operation.
#[derive(Default)]
pub struct RecordingTransport {
    next_id: AtomicUsize,
    pub sent: Mutex<Vec<SentWebhook>>,
    /// Every webhook URL dialed, successful or not.
    pub send_attempts: Mutex<Vec<String>>,
    pub edits: Mutex<Vec<(String, String, WebhookPayload)>>,
    pub deletes: Mutex<Vec<(String, String)>>,
    pub notices: Mutex<Vec<(String, String)>>,
    /// (channel, text, button label, token)
    pub prompts: Mutex<Vec<(String, String, String, String)>>,
    pub typing: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, InjectedFailure>>,
    nsfw_channels: Mutex<HashSet<String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The URL `create_webhook` mints for a channel.
    pub fn webhook_url(channel_id: &str) -> String {
        format!("https://hooks.test/{channel_id}")
    }

    /// Make every call against `url` fail with the given error.
    #[allow(dead_code)]
    pub fn fail_url(&self, url: &str, failure: InjectedFailure) {
        self.failures
            .lock()
            .unwrap()
            .insert(url.to_string(), failure);
    }

    #[allow(dead_code)]
    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Mark a channel as age-restricted for `fetch_channel`.
    #[allow(dead_code)]
    pub fn mark_nsfw(&self, channel_id: &str) {
        self.nsfw_channels
            .lock()
            .unwrap()
            .insert(channel_id.to_string());
    }

    /// How many times a webhook URL was dialed, successes and failures.
    #[allow(dead_code)]
    pub fn attempts_to(&self, url: &str) -> usize {
        self.send_attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }

    pub fn sent_to(&self, url: &str) -> Vec<SentWebhook> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.url == url)
            .cloned()
            .collect()
    }

    pub fn notices_to(&self, channel_id: &str) -> Vec<String> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .filter(|(channel, _)| channel == channel_id)
            .map(|(_, text)| text.clone())
            .collect()
    }

    fn check_failure(&self, url: &str) -> Result<(), TransportError> {
        match self.failures.lock().unwrap().get(url) {
            Some(InjectedFailure::Gone) => Err(TransportError::Gone),
            Some(InjectedFailure::Server) => Err(TransportError::Server(502)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_webhook(
        &self,
        url: &str,
        payload: &WebhookPayload,
    ) -> Result<String, TransportError> {
        self.send_attempts.lock().unwrap().push(url.to_string());
        self.check_failure(url)?;
        self.sent.lock().unwrap().push(SentWebhook {
            url: url.to_string(),
            payload: payload.clone(),
        });
        Ok(format!("wh-{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn edit_webhook_message(
        &self,
        url: &str,
        message_id: &str,
        payload: &WebhookPayload,
    ) -> Result<(), TransportError> {
        self.check_failure(url)?;
        self.edits.lock().unwrap().push((
            url.to_string(),
            message_id.to_string(),
            payload.clone(),
        ));
        Ok(())
    }

    async fn delete_webhook_message(
        &self,
        url: &str,
        message_id: &str,
    ) -> Result<(), TransportError> {
        self.check_failure(url)?;
        self.deletes
            .lock()
            .unwrap()
            .push((url.to_string(), message_id.to_string()));
        Ok(())
    }

    async fn create_webhook(&self, channel_id: &str) -> Result<String, TransportError> {
        Ok(Self::webhook_url(channel_id))
    }

    async fn list_channel_webhooks(
        &self,
        channel_id: &str,
    ) -> Result<Vec<WebhookInfo>, TransportError> {
        // The daemon-created webhook is always discoverable once minted;
        // modelling it as pre-existing keeps provisioning idempotent.
        Ok(vec![WebhookInfo {
            id: format!("hook-{channel_id}"),
            name: WEBHOOK_NAME.to_string(),
            url: Self::webhook_url(channel_id),
        }])
    }

    async fn send_notice(&self, channel_id: &str, text: &str) -> Result<(), TransportError> {
        self.notices
            .lock()
            .unwrap()
            .push((channel_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_prompt(
        &self,
        channel_id: &str,
        text: &str,
        button_label: &str,
        token: &str,
    ) -> Result<(), TransportError> {
        self.prompts.lock().unwrap().push((
            channel_id.to_string(),
            text.to_string(),
            button_label.to_string(),
            token.to_string(),
        ));
        Ok(())
    }

    async fn trigger_typing(&self, channel_id: &str) -> Result<(), TransportError> {
        self.typing.lock().unwrap().push(channel_id.to_string());
        Ok(())
    }

    async fn fetch_user(&self, user_id: &str) -> Result<Option<AuthorSnapshot>, TransportError> {
        Ok(Some(AuthorSnapshot {
            id: user_id.to_string(),
            display_name: format!("user-{user_id}"),
            avatar_url: None,
            is_bot: false,
        }))
    }

    async fn fetch_channel(
        &self,
        channel_id: &str,
    ) -> Result<Option<ChannelInfo>, TransportError> {
        Ok(Some(ChannelInfo {
            id: channel_id.to_string(),
            nsfw: self.nsfw_channels.lock().unwrap().contains(channel_id),
        }))
    }
}

/// An in-process daemon with its collaborators exposed.
pub struct TestHarness {
    pub runtime: Arc<Runtime>,
    pub transport: Arc<RecordingTransport>,
    pub kv: Arc<MemoryKv>,
    _db_dir: tempfile::TempDir,
}

/// Default test configuration: memory KV, metrics disabled, generous spam
/// budget so unrelated suites never trip it.
pub fn test_config() -> Config {
    toml::from_str(
        r#"
        [server]
        name = "test"
        metrics_port = 0
        admin_user_ids = ["staff-1"]

        [spam]
        window_ms = 5000
        max_messages = 100

        [relay]
        notice_cooldown_secs = 60

        [calls]
        recent_match_cooldown_secs = 300
        matchmaker_max_wait_secs = 180
        "#,
    )
    .expect("test config parses")
}

/// Build a harness from a config.
pub async fn harness_with(config: Config) -> TestHarness {
    let db_dir = tempfile::TempDir::new().expect("tempdir");
    let db_path = db_dir.path().join("interchat.db");
    let db = Database::new(db_path.to_str().unwrap()).await.expect("db");

    let kv = Arc::new(MemoryKv::new());
    let transport = Arc::new(RecordingTransport::new());

    let runtime = Arc::new(Runtime::build(RuntimeParams {
        config,
        db,
        kv: kv.clone(),
        transport: transport.clone(),
        content: None,
    }));

    TestHarness {
        runtime,
        transport,
        kv,
        _db_dir: db_dir,
    }
}

/// Build a harness with the default test configuration.
pub async fn harness() -> TestHarness {
    harness_with(test_config()).await
}

impl TestHarness {
    /// Create a hub and connect the given `(channel, server)` pairs.
    pub async fn hub_with_connections(
        &self,
        name: &str,
        channels: &[(&str, &str)],
    ) -> (HubRecord, Vec<ConnectionRecord>) {
        let hub = self
            .runtime
            .hubs
            .create_hub("owner-1", name, "test hub")
            .await
            .expect("create hub");

        let mut connections = Vec::new();
        for (channel, server) in channels {
            connections.push(
                self.runtime
                    .hubs
                    .join_hub(name, channel, server)
                    .await
                    .expect("join hub"),
            );
        }
        (hub, connections)
    }

    /// Raw database handle.
    pub fn db(&self) -> &Database {
        self.runtime.store.db()
    }
}

/// A message snapshot from a human author.
pub fn snapshot(channel: &str, server: &str, user: &str, content: &str) -> MessageSnapshot {
    static SEQ: AtomicUsize = AtomicUsize::new(0);
    MessageSnapshot {
        message_id: format!("msg-{}", SEQ.fetch_add(1, Ordering::SeqCst)),
        channel_id: channel.to_string(),
        server_id: server.to_string(),
        author: AuthorSnapshot {
            id: user.to_string(),
            display_name: format!("name-{user}"),
            avatar_url: Some(format!("https://cdn.test/{user}.png")),
            is_bot: false,
        },
        content: content.to_string(),
        attachment_url: None,
        channel_nsfw: false,
        reply_to: None,
        sent_at: chrono::Utc::now(),
    }
}
