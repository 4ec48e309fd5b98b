//! Shared error type
//!
//! Each crate defines its own error enum and converts into this one at the
//! boundary, so callers outside a subsystem only ever see `core::Error`.

use thiserror::Error;

/// Top-level error for the chat agent
#[derive(Error, Debug)]
pub enum Error {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Message store error: {0}")]
    Store(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Convenience result alias
pub type Result<T> = std::result::Result<T, Error>;
