//! Short-term memory
//!
//! The per-`(user, conversation)` working set: a capped JSON turn log in the
//! KV store plus up to three layered summaries. Reads compose the layered
//! context; writes append a turn and trigger background compression when the
//! token estimate crosses the configured thresholds.

use std::sync::Arc;

use serde::Serialize;

use chat_agent_core::{MessageStore, Turn};
use chat_agent_config::MemorySettings;

use crate::compression::{CompressionPool, JobPriority};
use crate::kv::{keys, KvStore};
use crate::summary::SummaryLevel;

/// Short-term memory configuration
#[derive(Debug, Clone)]
pub struct ShortTermConfig {
    pub enabled: bool,
    /// Token estimate that queues high-priority compression
    pub max_tokens: usize,
    /// Token estimate that queues normal-priority compression
    pub warning_tokens: usize,
    pub conversation_ttl_seconds: u64,
    /// Turn-log cap
    pub max_entries: usize,
}

impl Default for ShortTermConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tokens: 3000,
            warning_tokens: 2500,
            conversation_ttl_seconds: 86400 * 7,
            max_entries: 100,
        }
    }
}

impl From<&MemorySettings> for ShortTermConfig {
    fn from(settings: &MemorySettings) -> Self {
        Self {
            enabled: settings.short_term_enabled,
            max_tokens: settings.max_tokens,
            warning_tokens: settings.warning_tokens,
            conversation_ttl_seconds: settings.conversation_ttl_seconds,
            max_entries: 100,
        }
    }
}

/// Where a context read was satisfied from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContextSource {
    #[serde(rename = "redis")]
    Redis,
    #[serde(rename = "database→redis")]
    DatabaseToRedis,
    #[serde(rename = "redis_compressed")]
    RedisCompressed,
    #[serde(rename = "empty")]
    Empty,
}

/// Result of a context read
#[derive(Debug, Clone)]
pub struct ShortTermContext {
    pub context: String,
    pub source: ContextSource,
    pub recent_turns: usize,
    /// Whether layered summaries contributed to the context
    pub compressed: bool,
    /// Raw turns, chronological; used by intent classification
    pub conversations: Vec<Turn>,
}

impl ShortTermContext {
    fn empty() -> Self {
        Self {
            context: String::new(),
            source: ContextSource::Empty,
            recent_turns: 0,
            compressed: false,
            conversations: Vec::new(),
        }
    }
}

/// Structural token estimate: `⌊1.5 × CJK codepoints + alphabetic words⌋`
///
/// Fast, deterministic, and self-contained; the constant is part of the
/// compression contract so tests can pin thresholds.
pub fn estimate_tokens(text: &str) -> usize {
    let cjk = text.chars().filter(|c| ('\u{4e00}'..='\u{9fff}').contains(c)).count();
    let words = text
        .split_whitespace()
        .filter(|w| !w.is_empty() && w.chars().all(char::is_alphabetic))
        .count();
    (1.5 * cjk as f64 + words as f64).floor() as usize
}

/// Token estimate of one turn, message and response counted separately
pub fn estimate_turn_tokens(turn: &Turn) -> usize {
    estimate_tokens(&turn.message) + estimate_tokens(&turn.response)
}

/// Short-term memory over the KV store
pub struct ShortTermMemory {
    kv: Arc<dyn KvStore>,
    store: Arc<dyn MessageStore>,
    pool: Arc<CompressionPool>,
    config: ShortTermConfig,
}

impl ShortTermMemory {
    pub fn new(
        kv: Arc<dyn KvStore>,
        store: Arc<dyn MessageStore>,
        pool: Arc<CompressionPool>,
        config: ShortTermConfig,
    ) -> Self {
        Self { kv, store, pool, config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Compose the recent context for one conversation
    ///
    /// Redis-first; an empty list falls through to the persistent store and
    /// hydrates the list for the next read. Never fails: degraded tiers
    /// contribute an empty context.
    pub async fn get_recent_context(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> ShortTermContext {
        if !self.config.enabled {
            return ShortTermContext::empty();
        }

        let key = keys::conversation(user_id, conversation_id);
        let mut turns = match self.kv.lrange(&key, limit).await {
            Ok(entries) => decode_turns(&entries),
            Err(e) => {
                tracing::warn!(user_id, conversation_id, error = %e, "turn-log read failed");
                Vec::new()
            },
        };
        // LRANGE returns newest-first
        turns.reverse();

        let mut source = ContextSource::Redis;

        if turns.is_empty() {
            // Lazy hydration from the authoritative store
            turns = match self.store.recent_turns(conversation_id, limit).await {
                Ok(turns) => turns,
                Err(e) => {
                    tracing::warn!(conversation_id, error = %e, "message-store hydration failed");
                    Vec::new()
                },
            };
            if turns.is_empty() {
                return ShortTermContext::empty();
            }

            // Write back chronologically so the list head ends up newest
            for turn in &turns {
                if let Ok(json) = serde_json::to_string(turn) {
                    let _ = self.kv.lpush(&key, &json).await;
                }
            }
            let _ = self.kv.ltrim(&key, self.config.max_entries).await;
            let _ = self.kv.expire(&key, self.config.conversation_ttl_seconds).await;
            source = ContextSource::DatabaseToRedis;
            tracing::info!(user_id, conversation_id, turns = turns.len(), "hydrated turn log");
        }

        let summaries = self.layer_summaries(user_id, conversation_id).await;
        let compressed = !summaries.is_empty();
        if compressed && source == ContextSource::Redis {
            source = ContextSource::RedisCompressed;
        }

        let context = compose_context(&summaries, &turns);

        ShortTermContext {
            context,
            source,
            recent_turns: turns.len(),
            compressed,
            conversations: turns,
        }
    }

    /// Append a turn and trigger compression when the budget is exceeded
    ///
    /// Compression runs asynchronously; the write reports success regardless
    /// of its eventual outcome.
    pub async fn smart_store(
        &self,
        user_id: &str,
        conversation_id: &str,
        message: &str,
        response: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        if !self.config.enabled {
            return false;
        }

        let key = keys::conversation(user_id, conversation_id);
        let turn = Turn::new(message, response).with_metadata(metadata);
        let json = match serde_json::to_string(&turn) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "turn serialization failed");
                return false;
            },
        };

        if let Err(e) = self.kv.lpush(&key, &json).await {
            tracing::warn!(user_id, conversation_id, error = %e, "turn write failed");
            return false;
        }
        let _ = self.kv.ltrim(&key, self.config.max_entries).await;
        let _ = self.kv.expire(&key, self.config.conversation_ttl_seconds).await;

        let total_tokens = match self.kv.lrange(&key, self.config.max_entries).await {
            Ok(entries) => decode_turns(&entries).iter().map(estimate_turn_tokens).sum::<usize>(),
            Err(_) => 0,
        };

        if total_tokens >= self.config.max_tokens {
            tracing::info!(
                user_id,
                conversation_id,
                total_tokens,
                limit = self.config.max_tokens,
                "token limit exceeded, queueing high-priority compression"
            );
            self.pool.enqueue(user_id, conversation_id, JobPriority::High);
        } else if total_tokens >= self.config.warning_tokens {
            tracing::info!(
                user_id,
                conversation_id,
                total_tokens,
                threshold = self.config.warning_tokens,
                "token warning, queueing compression"
            );
            self.pool.enqueue(user_id, conversation_id, JobPriority::Normal);
        }

        true
    }

    async fn layer_summaries(&self, user_id: &str, conversation_id: &str) -> Vec<String> {
        let mut lines = Vec::new();
        for level in SummaryLevel::RENDER_ORDER {
            let key = keys::summary(user_id, conversation_id, level);
            if let Ok(Some(summary)) = self.kv.get(&key).await {
                if !summary.is_empty() {
                    lines.push(format!("[{}摘要] {summary}", level.as_str()));
                }
            }
        }
        lines
    }
}

fn decode_turns(entries: &[String]) -> Vec<Turn> {
    entries
        .iter()
        .filter_map(|json| serde_json::from_str::<Turn>(json).ok())
        .collect()
}

/// Render summaries and recent turns as one context block
///
/// Duplicate `(message, response)` pairs are rendered once, keeping the
/// first occurrence in chronological order.
fn compose_context(summary_lines: &[String], turns: &[Turn]) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !summary_lines.is_empty() {
        parts.push(summary_lines.join("\n"));
    }

    let mut seen = std::collections::HashSet::new();
    let mut turn_lines = Vec::new();
    for turn in turns {
        let dedup_key = format!("{}|{}", turn.message, turn.response);
        if !seen.insert(dedup_key) {
            continue;
        }
        turn_lines.push(format!("用户: {}", turn.message));
        turn_lines.push(format!("助手: {}", turn.response));
    }

    if !turn_lines.is_empty() {
        let block = format!("最近对话：\n{}", turn_lines.join("\n"));
        parts.push(block);
    }

    parts.join("\n\n")
}
