//! Chat request types

use serde::{Deserialize, Serialize};

fn default_user_id() -> String {
    "default_user".to_string()
}

/// An incoming chat request
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    /// Conversation identifier (external, client-supplied)
    #[serde(alias = "conversationId")]
    pub conversation_id: String,
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Attachment kind as sent by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    File,
    Url,
}

/// A pre-extracted attachment: the client uploads files / URLs separately and
/// sends the extracted text along with the message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub content: String,
}

impl Attachment {
    pub fn file(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::File,
            filename: Some(filename.into()),
            url: None,
            content: content.into(),
        }
    }

    pub fn url(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::Url,
            filename: None,
            url: Some(url.into()),
            content: content.into(),
        }
    }
}
