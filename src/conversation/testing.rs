//! In-process fakes for the relay's collaborators.

use crate::completion::Completer;
use crate::config::DatabaseConfig;
use crate::conversation::{
    Conversation, ConversationRelay, ConversationStore, NewConversation, SqliteConversationStore,
};
use crate::error::{RelayError, RelayResult};
use crate::messaging::Notifier;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

pub const FALLBACK_REPLY: &str = "Sorry, try again later!";

pub async fn memory_store() -> SqliteConversationStore {
    let config = DatabaseConfig {
        database_url: "sqlite::memory:".to_string(),
        max_connections: 1,
    };
    SqliteConversationStore::connect(&config).await.unwrap()
}

pub struct StubCompleter {
    reply: Option<String>,
    prompts: Mutex<Vec<String>>,
}
impl StubCompleter {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Completer for StubCompleter {
    async fn complete(&self, message: &str) -> RelayResult<String> {
        self.prompts.lock().unwrap().push(message.to_string());
        self.reply
            .clone()
            .ok_or_else(|| RelayError::Completion("503 Service Unavailable".to_string()))
    }
}

/// Records every send attempt, including the ones it fails.
#[derive(Default)]
pub struct RecordingNotifier {
    fail: bool,
    sent: Mutex<Vec<(String, String)>>,
}
impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipient: &str, body: &str) -> RelayResult<String> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((recipient.to_string(), body.to_string()));
        if self.fail {
            return Err(RelayError::Notification("500 Internal Server Error".to_string()));
        }
        Ok(format!("SM{}", sent.len()))
    }
}

pub struct FailingStore;

#[async_trait]
impl ConversationStore for FailingStore {
    async fn insert_conversation(&self, _conversation: NewConversation<'_>) -> RelayResult<i64> {
        Err(RelayError::Persistence(sqlx::Error::PoolTimedOut))
    }

    async fn get_conversations(
        &self,
        _sender: &str,
        _limit: Option<u64>,
        _offset: Option<u64>,
        _reverse: bool,
    ) -> RelayResult<Vec<Conversation>> {
        Err(RelayError::Persistence(sqlx::Error::PoolTimedOut))
    }
}

/// A relay wired to a stub completer, an in-memory store and a recording notifier.
pub struct Harness {
    pub relay: ConversationRelay,
    pub completer: Arc<StubCompleter>,
    pub store: Arc<SqliteConversationStore>,
    pub notifier: Arc<RecordingNotifier>,
}
impl Harness {
    pub async fn new(completer: StubCompleter) -> Self {
        let completer = Arc::new(completer);
        let store = Arc::new(memory_store().await);
        let notifier = Arc::new(RecordingNotifier::default());
        let relay = ConversationRelay::new(
            completer.clone(),
            store.clone(),
            notifier.clone(),
            Some(FALLBACK_REPLY.to_string()),
        );

        Self {
            relay,
            completer,
            store,
            notifier,
        }
    }

    pub async fn rows(&self, sender: &str) -> Vec<Conversation> {
        self.store
            .get_conversations(sender, None, None, false)
            .await
            .unwrap()
    }
}
