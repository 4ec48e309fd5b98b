//! Multi-tier memory subsystem
//!
//! Features:
//! - Redis-backed per-conversation working set with a capped turn log
//! - Three-level incremental summarization (L1/L2/L3) driven by a bounded
//!   background worker pool
//! - Deterministic importance scoring for long-term storage decisions
//! - Importance-gated semantic memory over a vector store
//! - LLM-extracted user profiles with typed merge semantics
//! - A unified façade that fans out reads and writes across all tiers

pub mod compression;
pub mod importance;
pub mod kv;
pub mod long_term;
pub mod profile;
pub mod short_term;
pub mod summary;
pub mod unified;
pub mod vector_store;

pub use compression::{CompressionPool, CompressionPoolConfig, JobPriority};
pub use importance::{ImportanceScorer, ScoreContext};
pub use kv::{keys, InMemoryStore, KvStore, RedisStore};
pub use long_term::{LongTermConfig, LongTermMemory, RecalledMemory, StorageOutcome};
pub use profile::{Identity, ProfileService, UserProfile};
pub use short_term::{
    estimate_tokens, estimate_turn_tokens, ContextSource, ShortTermConfig, ShortTermContext,
    ShortTermMemory,
};
pub use summary::{SummaryGenerator, SummaryLevel};
pub use unified::{ConversationContext, ProcessOutcome, UnifiedMemory, UnifiedMemoryConfig};
pub use vector_store::{InMemoryVectorStore, MemoryRecord, QdrantStore, ScoredMemory, VectorStore};

use thiserror::Error;

/// Memory subsystem errors
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("KV store error: {0}")]
    Kv(String),

    #[error("vector store error: {0}")]
    Vector(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        MemoryError::Serialization(err.to_string())
    }
}

impl From<chat_agent_llm::LlmError> for MemoryError {
    fn from(err: chat_agent_llm::LlmError) -> Self {
        MemoryError::Llm(err.to_string())
    }
}

impl From<MemoryError> for chat_agent_core::Error {
    fn from(err: MemoryError) -> Self {
        chat_agent_core::Error::Memory(err.to_string())
    }
}
