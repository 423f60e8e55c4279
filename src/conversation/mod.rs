mod database;

#[cfg(test)]
pub(crate) mod testing;

pub use database::SqliteConversationStore;

use crate::completion::Completer;
use crate::error::{RelayError, RelayResult};
use crate::messaging::{strip_whatsapp_prefix, Notifier};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// One stored exchange. Rows are only ever inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Conversation {
    pub id: i64,
    pub sender: String,
    pub message: String,
    pub response: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct NewConversation<'a> {
    pub sender: &'a str,
    pub message: &'a str,
    pub response: &'a str,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Inserts a row in its own transaction and returns the assigned id.
    async fn insert_conversation(&self, conversation: NewConversation<'_>) -> RelayResult<i64>;

    async fn get_conversations(
        &self,
        sender: &str,
        limit: Option<u64>,
        offset: Option<u64>,
        reverse: bool,
    ) -> RelayResult<Vec<Conversation>>;
}

/// An inbound WhatsApp message extracted from the webhook form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Phone number without the `whatsapp:` prefix.
    pub sender: String,
    pub body: String,
}
impl InboundMessage {
    pub fn from_form(params: &BTreeMap<String, String>) -> RelayResult<Self> {
        let from = params
            .get("From")
            .map(|from| from.trim())
            .filter(|from| !from.is_empty())
            .ok_or_else(|| RelayError::MalformedRequest("missing From field".to_string()))?;

        let sender = strip_whatsapp_prefix(from).trim();
        if sender.is_empty() {
            return Err(RelayError::MalformedRequest(format!(
                "From field has no phone number: {from}"
            )));
        }

        let body = params
            .get("Body")
            .ok_or_else(|| RelayError::MalformedRequest("missing Body field".to_string()))?;

        Ok(Self {
            sender: sender.to_string(),
            body: body.clone(),
        })
    }

    /// Media-only messages arrive with an empty or whitespace `Body`.
    pub fn is_blank(&self) -> bool {
        self.body.trim().is_empty()
    }
}

/// What a relay cycle managed to do. Every cycle ends acknowledged, this only
/// records which side exits were taken.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    /// The text sent (or attempted) back to the sender.
    pub reply: Option<String>,
    pub conversation_id: Option<i64>,
    pub message_sid: Option<String>,
}

/// Receive -> complete -> persist -> notify, for a single inbound message.
#[derive(Clone)]
pub struct ConversationRelay {
    completer: Arc<dyn Completer>,
    store: Arc<dyn ConversationStore>,
    notifier: Arc<dyn Notifier>,
    fallback_reply: Option<String>,
}
impl ConversationRelay {
    pub fn new(
        completer: Arc<dyn Completer>,
        store: Arc<dyn ConversationStore>,
        notifier: Arc<dyn Notifier>,
        fallback_reply: Option<String>,
    ) -> Self {
        Self {
            completer,
            store,
            notifier,
            fallback_reply,
        }
    }

    #[inline]
    pub fn borrow_store(&self) -> &dyn ConversationStore {
        self.store.as_ref()
    }

    /// Never fails: completion, persistence and notification errors are
    /// logged where they happen. A failed completion is never persisted.
    #[instrument(skip_all, fields(sender = %inbound.sender))]
    pub async fn relay(&self, inbound: &InboundMessage) -> RelayOutcome {
        let mut outcome = RelayOutcome::default();

        let reply = match self.completer.complete(&inbound.body).await {
            Ok(reply) => {
                debug!("Completion received ({} bytes)", reply.len());
                outcome.conversation_id = self.log_conversation(inbound, &reply).await;
                reply
            }
            Err(e) => {
                error!("Failed to get completion: {e}");
                match &self.fallback_reply {
                    Some(fallback) => fallback.clone(),
                    None => {
                        warn!("No fallback reply configured, leaving sender unanswered");
                        return outcome;
                    }
                }
            }
        };

        info!("Sending the reply to {}", inbound.sender);
        outcome.message_sid = match self.notifier.send(&inbound.sender, &reply).await {
            Ok(message_sid) => Some(message_sid),
            Err(e) => {
                error!("Failed to send reply: {e}");
                None
            }
        };

        outcome.reply = Some(reply);
        outcome
    }

    async fn log_conversation(&self, inbound: &InboundMessage, response: &str) -> Option<i64> {
        let conversation = NewConversation {
            sender: &inbound.sender,
            message: &inbound.body,
            response,
        };

        match self.store.insert_conversation(conversation).await {
            Ok(id) => {
                info!("Conversation #{id} stored in database");
                Some(id)
            }
            Err(e) => {
                error!("Error storing conversation in database: {e}");
                None
            }
        }
    }
}
