//! Streamed chat events
//!
//! Every event reaches the client as one SSE frame: `data: <JSON>\n\n`. The
//! `message_created` event is always emitted before `end`; a fatal pipeline
//! failure collapses into a single `error` event.

use serde::Serialize;

use chat_agent_core::SandboxImage;

/// One event in the chat response stream
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Incremental text from the model
    Content { content: String },
    /// Artifact produced by code execution
    Image { url: String, filename: String },
    /// Persistence completed
    MessageCreated {
        user_message_id: String,
        ai_message_id: String,
        conversation_id: String,
        intent: String,
        sources: Vec<String>,
    },
    /// Persistence failed
    MessageCreationError { error: String },
    /// End of stream
    End,
    /// Fatal pipeline error
    Error { content: String },
}

impl ChatEvent {
    pub fn content(text: impl Into<String>) -> Self {
        ChatEvent::Content { content: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        ChatEvent::Error { content: text.into() }
    }

    pub fn image(artifact: &SandboxImage) -> Self {
        ChatEvent::Image { url: artifact.url.clone(), filename: artifact.filename.clone() }
    }

    /// Wire form: one SSE frame
    pub fn to_sse(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => format!("data: {json}\n\n"),
            // Serialization of these variants cannot fail; guard anyway
            Err(_) => "data: {\"type\":\"error\",\"content\":\"serialization failed\"}\n\n"
                .to_string(),
        }
    }
}
