//! Core traits and types for the chat agent
//!
//! This crate provides the foundational types used across all other crates:
//! - Conversation types (turns, roles, requests, attachments)
//! - Intent definitions
//! - Collaborator traits for pluggable externals (message store, sandbox,
//!   web search, page fetch) plus in-memory / no-op realizations
//! - Error types

pub mod conversation;
pub mod error;
pub mod intent;
pub mod request;
pub mod traits;

pub use conversation::{MessageRole, StoredMessage, Turn};
pub use error::{Error, Result};
pub use intent::Intent;
pub use request::{Attachment, AttachmentKind, ChatRequest};

pub use traits::fetch::{FetchError, PageContent, PageFetcher};
pub use traits::sandbox::{CodeSandbox, DisabledSandbox, SandboxImage, SandboxOutcome};
pub use traits::search::{SearchHit, SearchResults, WebSearcher};
pub use traits::store::{InMemoryMessageStore, MessageStore};
