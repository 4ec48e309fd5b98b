//! LLM integration
//!
//! Features:
//! - DashScope/Qwen text-generation client (single-shot and SSE streaming)
//! - DashScope embedding client, batched
//! - Per-intent system prompt assembly
//! - Model-output parsing helpers (first JSON object, fenced Python)
//! - Scripted offline doubles for tests and degraded wiring

pub mod client;
pub mod embeddings;
pub mod parse;
pub mod prompt;

pub use client::{GenerationParams, LlmClient, QwenClient, ScriptedClient};
pub use embeddings::{DashScopeEmbedder, Embedder, HashEmbedder};
pub use parse::{extract_json_object, extract_python_block};
pub use prompt::{build_messages, system_prompt, Message, PromptInputs, Role};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("request timed out")]
    Timeout,

    #[error("authentication failed")]
    AuthFailed,

    #[error("rate limited by upstream")]
    RateLimited,

    #[error("content rejected by upstream inspection")]
    ContentRejected,

    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Unavailable(err.to_string())
        }
    }
}

impl From<LlmError> for chat_agent_core::Error {
    fn from(err: LlmError) -> Self {
        chat_agent_core::Error::Llm(err.to_string())
    }
}
