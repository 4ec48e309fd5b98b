//! Conversation types
//!
//! A `Turn` is one `(user_message, ai_response)` pair and is the unit of
//! short-term storage. Turns are append-only; the compression worker replaces
//! whole lists, never individual entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One user/assistant exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    /// User message content
    pub message: String,
    /// Assistant response content
    pub response: String,
    /// Wall-clock time the turn was recorded
    pub timestamp: DateTime<Utc>,
    /// Free-form metadata attached at write time
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Turn {
    pub fn new(message: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            response: response.into(),
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Message role in the persistent conversation store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A single persisted message as seen through the message-store seam
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_json_round_trip() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("intent".to_string(), serde_json::json!("normal"));

        let turn = Turn::new("你好", "你好！有什么可以帮你的吗？").with_metadata(metadata);

        let encoded = serde_json::to_string(&turn).unwrap();
        let decoded: Turn = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded, turn);
    }

    #[test]
    fn test_turn_without_metadata_round_trip() {
        let turn = Turn::new("message", "response");
        let encoded = serde_json::to_string(&turn).unwrap();

        // Empty metadata is omitted from the wire form entirely
        assert!(!encoded.contains("metadata"));

        let decoded: Turn = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, turn);
    }

    #[test]
    fn test_message_role_serialization() {
        assert_eq!(serde_json::to_string(&MessageRole::User).unwrap(), "\"user\"");
        assert_eq!(MessageRole::Assistant.as_str(), "assistant");
    }
}
