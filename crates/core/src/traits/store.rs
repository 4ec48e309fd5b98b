//! Persistent conversation store seam
//!
//! Message CRUD lives in an external relational store. The core only needs
//! two operations: read recent turns (the authoritative view used by the
//! compression worker and short-term hydration) and append one message.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::conversation::{MessageRole, StoredMessage, Turn};
use crate::error::Result;

/// Interface to the persistent conversation store
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Most recent turns of a conversation, in chronological order
    async fn recent_turns(&self, conversation_id: &str, limit: usize) -> Result<Vec<Turn>>;

    /// Append one message, returning the new message id
    async fn create_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        intent: Option<&str>,
        sources: &[String],
    ) -> Result<String>;
}

/// In-memory message store
///
/// Default realization used when no relational store is wired, and by tests.
#[derive(Default)]
pub struct InMemoryMessageStore {
    conversations: DashMap<String, Vec<StoredMessage>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total message count for one conversation
    pub fn message_count(&self, conversation_id: &str) -> usize {
        self.conversations
            .get(conversation_id)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Raw messages for inspection in tests
    pub fn messages(&self, conversation_id: &str) -> Vec<StoredMessage> {
        self.conversations
            .get(conversation_id)
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn recent_turns(&self, conversation_id: &str, limit: usize) -> Result<Vec<Turn>> {
        let messages = self.messages(conversation_id);

        // Pair each user message with the assistant message that follows it.
        let mut turns = Vec::new();
        let mut pending_user: Option<&StoredMessage> = None;
        for message in &messages {
            match message.role {
                MessageRole::User => pending_user = Some(message),
                MessageRole::Assistant => {
                    if let Some(user) = pending_user.take() {
                        turns.push(
                            Turn::new(user.content.clone(), message.content.clone())
                                .with_timestamp(message.created_at),
                        );
                    }
                },
            }
        }

        let start = turns.len().saturating_sub(limit);
        Ok(turns.split_off(start))
    }

    async fn create_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        intent: Option<&str>,
        sources: &[String],
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let message = StoredMessage {
            id: id.clone(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            intent: intent.map(|s| s.to_string()),
            sources: sources.to_vec(),
            created_at: Utc::now(),
        };
        self.conversations
            .entry(conversation_id.to_string())
            .or_default()
            .push(message);
        Ok(id)
    }
}
