//! Unified memory façade
//!
//! The single surface the orchestrator talks to. Reads fan out in parallel
//! to short-term context, semantic recall, and the stored profile; writes
//! fan out to the short-term log, long-term storage, and profile
//! extraction. Tiers degrade independently: a failed tier contributes
//! nothing but never fails the call.

use std::sync::Arc;

use chat_agent_core::Turn;
use chat_agent_config::MemorySettings;

use crate::long_term::{LongTermMemory, StorageOutcome};
use crate::profile::{format_profile_block, ProfileService, UserProfile};
use crate::short_term::{ContextSource, ShortTermMemory};

/// Maximum compressed memory lines included in the context
const MAX_RECALL_LINES: usize = 3;

/// Façade configuration: per-tier enable flags
#[derive(Debug, Clone)]
pub struct UnifiedMemoryConfig {
    pub short_term_enabled: bool,
    pub long_term_enabled: bool,
}

impl Default for UnifiedMemoryConfig {
    fn default() -> Self {
        Self { short_term_enabled: true, long_term_enabled: true }
    }
}

impl From<&MemorySettings> for UnifiedMemoryConfig {
    fn from(settings: &MemorySettings) -> Self {
        Self {
            short_term_enabled: settings.short_term_enabled,
            long_term_enabled: settings.long_term_enabled,
        }
    }
}

/// Composed context for one request
#[derive(Debug, Clone)]
pub struct ConversationContext {
    /// Final context block handed to prompt assembly
    pub full_context: String,
    /// Raw recent turns, for intent classification
    pub conversations: Vec<Turn>,
    pub metadata: ContextMetadata,
}

/// Per-tier status of a context read
#[derive(Debug, Clone, Default)]
pub struct ContextMetadata {
    pub short_term_enabled: bool,
    pub long_term_enabled: bool,
    pub source: Option<ContextSource>,
    pub recent_turns: usize,
    pub compressed: bool,
    pub recalled_memories: usize,
    pub profile_present: bool,
}

/// Outcome of a post-turn memory write
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub success: bool,
    pub short_term_stored: bool,
    pub long_term: StorageOutcome,
    /// Whether profile extraction found and persisted anything
    pub profile_updated: bool,
}

/// Unified memory manager
pub struct UnifiedMemory {
    short_term: Arc<ShortTermMemory>,
    long_term: Arc<LongTermMemory>,
    profile: Arc<ProfileService>,
    config: UnifiedMemoryConfig,
}

impl UnifiedMemory {
    pub fn new(
        short_term: Arc<ShortTermMemory>,
        long_term: Arc<LongTermMemory>,
        profile: Arc<ProfileService>,
        config: UnifiedMemoryConfig,
    ) -> Self {
        tracing::info!(
            short_term = config.short_term_enabled,
            long_term = config.long_term_enabled,
            "unified memory initialized"
        );
        Self { short_term, long_term, profile, config }
    }

    pub fn profile_service(&self) -> &Arc<ProfileService> {
        &self.profile
    }

    pub fn long_term(&self) -> &Arc<LongTermMemory> {
        &self.long_term
    }

    /// Assemble the full conversation context
    ///
    /// The three tier reads run concurrently; total latency tracks the
    /// slowest tier, not the sum.
    pub async fn get_conversation_context(
        &self,
        user_id: &str,
        conversation_id: &str,
        current_message: &str,
        limit: usize,
    ) -> ConversationContext {
        let short_term = async {
            if self.config.short_term_enabled {
                Some(self.short_term.get_recent_context(user_id, conversation_id, limit).await)
            } else {
                None
            }
        };
        let recall = async {
            if self.config.long_term_enabled {
                self.long_term.search_relevant(user_id, current_message, limit, 0.0, None).await
            } else {
                Vec::new()
            }
        };
        let profile = async {
            if self.config.long_term_enabled {
                self.profile.profile(user_id).await
            } else {
                UserProfile::default()
            }
        };

        let (short_term, memories, profile) = tokio::join!(short_term, recall, profile);

        let mut metadata = ContextMetadata {
            short_term_enabled: self.config.short_term_enabled,
            long_term_enabled: self.config.long_term_enabled,
            recalled_memories: memories.len(),
            profile_present: !profile.is_empty(),
            ..ContextMetadata::default()
        };

        let mut parts: Vec<String> = Vec::new();

        if !profile.is_empty() {
            parts.push(
                "以下是关于用户的一些已知信息，请在对话中自然地利用这些信息，让用户感受到你认识他们："
                    .to_string(),
            );
            parts.push(format_profile_block(&profile));
        }

        let recall_lines: Vec<String> =
            memories.iter().take(MAX_RECALL_LINES).map(|m| m.compressed_line()).collect();
        if !recall_lines.is_empty() {
            parts.push("\n相关历史记忆：".to_string());
            parts.push(recall_lines.join("\n"));
        }

        let mut conversations = Vec::new();
        if let Some(short_term) = short_term {
            metadata.source = Some(short_term.source);
            metadata.recent_turns = short_term.recent_turns;
            metadata.compressed = short_term.compressed;
            conversations = short_term.conversations;

            if !short_term.context.is_empty() {
                parts.push("\n最近对话：".to_string());
                parts.push(short_term.context);
            }
        }

        let full_context = parts.join("\n");
        tracing::debug!(
            user_id,
            conversation_id,
            chars = full_context.chars().count(),
            "context assembled"
        );

        ConversationContext { full_context, conversations, metadata }
    }

    /// Persist one completed turn across tiers
    ///
    /// Called after the response has been streamed to the client. Both
    /// writes are best-effort; neither failure aborts the other.
    pub async fn process_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        message: &str,
        response: &str,
        intent: &str,
        sources: &[String],
    ) -> ProcessOutcome {
        let short_term = async {
            if self.config.short_term_enabled {
                self.short_term
                    .smart_store(user_id, conversation_id, message, response, Default::default())
                    .await
            } else {
                false
            }
        };
        let long_term = async {
            if self.config.long_term_enabled {
                self.long_term
                    .process_for_storage(user_id, conversation_id, message, response, intent, sources)
                    .await
            } else {
                StorageOutcome {
                    stored: false,
                    memory_id: None,
                    importance_score: 0.0,
                    reason: "long-term memory disabled".to_string(),
                }
            }
        };
        let profile = async {
            if self.config.long_term_enabled {
                self.profile.extract(user_id, message).await
            } else {
                false
            }
        };

        let (short_term_stored, long_term, profile_updated) =
            tokio::join!(short_term, long_term, profile);

        if long_term.stored {
            tracing::info!(
                user_id,
                conversation_id,
                importance = long_term.importance_score,
                "turn stored in long-term memory"
            );
        }

        ProcessOutcome { success: true, short_term_stored, long_term, profile_updated }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use uuid::Uuid;

    use chat_agent_core::InMemoryMessageStore;
    use chat_agent_llm::{HashEmbedder, ScriptedClient};

    use crate::compression::{CompressionPool, CompressionPoolConfig};
    use crate::kv::{InMemoryStore, KvStore};
    use crate::long_term::LongTermConfig;
    use crate::short_term::ShortTermConfig;
    use crate::summary::SummaryGenerator;
    use crate::vector_store::{InMemoryVectorStore, MemoryRecord, ScoredMemory, VectorStore};
    use crate::MemoryError;

    struct Harness {
        unified: UnifiedMemory,
        llm: Arc<ScriptedClient>,
    }

    fn build(kv: Arc<dyn KvStore>, vector: Arc<dyn VectorStore>) -> Harness {
        let llm = Arc::new(ScriptedClient::new());
        let store = Arc::new(InMemoryMessageStore::new());
        let pool = Arc::new(CompressionPool::new(
            CompressionPoolConfig::default(),
            kv.clone(),
            store.clone(),
            Arc::new(SummaryGenerator::new(llm.clone())),
        ));
        let short_term =
            Arc::new(ShortTermMemory::new(kv.clone(), store, pool, ShortTermConfig::default()));
        let profile = Arc::new(ProfileService::new(kv.clone(), llm.clone(), 86400 * 7));
        let long_term = Arc::new(LongTermMemory::new(
            vector.clone(),
            Arc::new(HashEmbedder::default()),
            LongTermConfig::default(),
        ));
        let unified = UnifiedMemory::new(
            short_term,
            long_term,
            profile,
            UnifiedMemoryConfig::default(),
        );
        Harness { unified, llm }
    }

    #[tokio::test]
    async fn test_empty_everything_is_empty_context() {
        let harness = build(Arc::new(InMemoryStore::new()), Arc::new(InMemoryVectorStore::new()));
        let context = harness.unified.get_conversation_context("u1", "c1", "你好", 3).await;

        assert!(context.full_context.is_empty());
        assert!(context.conversations.is_empty());
        assert_eq!(context.metadata.recalled_memories, 0);
        assert!(!context.metadata.profile_present);
    }

    #[tokio::test]
    async fn test_context_composition_order() {
        let kv = Arc::new(InMemoryStore::new());
        let vector = Arc::new(InMemoryVectorStore::new());

        // Profile
        kv.set_ex(
            "profile:u1",
            60,
            r#"{"identity": {"name": "张三"}, "preferences": ["喜欢咖啡"]}"#,
        )
        .await
        .unwrap();

        // One semantic memory embedded as the query text
        let embedder = HashEmbedder::default();
        let embedding = futures_embed(&embedder, "推荐饮品").await;
        vector
            .upsert(
                "semantic_memory",
                Uuid::new_v4(),
                embedding,
                MemoryRecord::semantic("u1", "c1", "问题：咖啡\n回答：手冲", 0.82, "normal", vec![]),
            )
            .await
            .unwrap();

        let harness = build(kv.clone(), vector);
        // A recent turn
        harness.unified.process_conversation("u1", "c1", "早", "早上好", "normal", &[]).await;

        let context = harness.unified.get_conversation_context("u1", "c1", "推荐饮品", 3).await;
        let text = &context.full_context;

        let profile_at = text.find("以下是关于用户的一些已知信息").unwrap();
        let recall_at = text.find("相关历史记忆：").unwrap();
        let recent_at = text.find("最近对话：").unwrap();
        assert!(profile_at < recall_at && recall_at < recent_at);
        assert!(text.contains("[重要性: 0.82]"));
        assert!(text.contains("姓名：张三"));
        assert!(context.metadata.profile_present);
    }

    #[tokio::test]
    async fn test_partial_failure_tolerated() {
        // Vector tier errors on every call; context still assembles
        struct FailingVector;

        #[async_trait]
        impl VectorStore for FailingVector {
            async fn ensure_collection(&self, _: &str, _: usize) -> Result<(), MemoryError> {
                Err(MemoryError::Vector("down".into()))
            }
            async fn upsert(
                &self,
                _: &str,
                _: Uuid,
                _: Vec<f32>,
                _: MemoryRecord,
            ) -> Result<(), MemoryError> {
                Err(MemoryError::Vector("down".into()))
            }
            async fn search(
                &self,
                _: &str,
                _: &[f32],
                _: usize,
                _: &str,
                _: f32,
            ) -> Result<Vec<ScoredMemory>, MemoryError> {
                Err(MemoryError::Vector("down".into()))
            }
            async fn delete(&self, _: &str, _: Uuid) -> Result<(), MemoryError> {
                Err(MemoryError::Vector("down".into()))
            }
            async fn health(&self) -> bool {
                false
            }
        }

        let harness = build(Arc::new(InMemoryStore::new()), Arc::new(FailingVector));
        harness.unified.process_conversation("u1", "c1", "你好", "你好！", "normal", &[]).await;

        let context = harness.unified.get_conversation_context("u1", "c1", "你好", 3).await;
        assert!(context.full_context.contains("最近对话："));
        assert_eq!(context.metadata.recalled_memories, 0);
    }

    #[tokio::test]
    async fn test_disabled_tiers_contribute_nothing() {
        let kv = Arc::new(InMemoryStore::new());
        kv.set_ex("profile:u1", 60, r#"{"preferences": ["喜欢咖啡"]}"#).await.unwrap();

        let llm = Arc::new(ScriptedClient::new());
        let store = Arc::new(InMemoryMessageStore::new());
        let pool = Arc::new(CompressionPool::new(
            CompressionPoolConfig::default(),
            kv.clone(),
            store.clone(),
            Arc::new(SummaryGenerator::new(llm.clone())),
        ));
        let short_term = Arc::new(ShortTermMemory::new(
            kv.clone(),
            store,
            pool,
            ShortTermConfig::default(),
        ));
        let profile = Arc::new(ProfileService::new(kv.clone(), llm, 60));
        let long_term = Arc::new(LongTermMemory::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(HashEmbedder::default()),
            LongTermConfig::default(),
        ));
        let unified = UnifiedMemory::new(
            short_term,
            long_term,
            profile,
            UnifiedMemoryConfig { short_term_enabled: true, long_term_enabled: false },
        );

        unified.process_conversation("u1", "c1", "你好", "嗨", "normal", &[]).await;
        let context = unified.get_conversation_context("u1", "c1", "你好", 3).await;

        // Long-term disabled: no profile preamble despite a stored profile
        assert!(!context.full_context.contains("已知信息"));
        assert!(context.full_context.contains("最近对话："));
    }

    /// KV wrapper that delays the tier-dominant reads
    struct DelayKv {
        inner: InMemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl KvStore for DelayKv {
        async fn get(&self, key: &str) -> Result<Option<String>, MemoryError> {
            if key.starts_with("profile:") {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.get(key).await
        }
        async fn set_ex(&self, key: &str, ttl: u64, value: &str) -> Result<(), MemoryError> {
            self.inner.set_ex(key, ttl, value).await
        }
        async fn del(&self, key: &str) -> Result<(), MemoryError> {
            self.inner.del(key).await
        }
        async fn lpush(&self, key: &str, value: &str) -> Result<(), MemoryError> {
            self.inner.lpush(key, value).await
        }
        async fn ltrim(&self, key: &str, n: usize) -> Result<(), MemoryError> {
            self.inner.ltrim(key, n).await
        }
        async fn lrange(&self, key: &str, n: usize) -> Result<Vec<String>, MemoryError> {
            tokio::time::sleep(self.delay).await;
            self.inner.lrange(key, n).await
        }
        async fn expire(&self, key: &str, ttl: u64) -> Result<(), MemoryError> {
            self.inner.expire(key, ttl).await
        }
        async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, MemoryError> {
            self.inner.hgetall(key).await
        }
        async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), MemoryError> {
            self.inner.hset(key, field, value).await
        }
        async fn keys(&self, pattern: &str) -> Result<Vec<String>, MemoryError> {
            self.inner.keys(pattern).await
        }
        async fn ping(&self) -> bool {
            true
        }
    }

    /// Vector wrapper that delays searches
    struct DelayVector {
        inner: InMemoryVectorStore,
        delay: Duration,
    }

    #[async_trait]
    impl VectorStore for DelayVector {
        async fn ensure_collection(&self, name: &str, dim: usize) -> Result<(), MemoryError> {
            self.inner.ensure_collection(name, dim).await
        }
        async fn upsert(
            &self,
            collection: &str,
            id: Uuid,
            vector: Vec<f32>,
            record: MemoryRecord,
        ) -> Result<(), MemoryError> {
            self.inner.upsert(collection, id, vector, record).await
        }
        async fn search(
            &self,
            collection: &str,
            query: &[f32],
            k: usize,
            user_id: &str,
            min_score: f32,
        ) -> Result<Vec<ScoredMemory>, MemoryError> {
            tokio::time::sleep(self.delay).await;
            self.inner.search(collection, query, k, user_id, min_score).await
        }
        async fn delete(&self, collection: &str, id: Uuid) -> Result<(), MemoryError> {
            self.inner.delete(collection, id).await
        }
        async fn health(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_tier_reads_run_in_parallel() {
        let delay = Duration::from_millis(100);
        let kv = Arc::new(DelayKv { inner: InMemoryStore::new(), delay });
        let vector = Arc::new(DelayVector { inner: InMemoryVectorStore::new(), delay: delay / 2 });

        kv.inner.set_ex("profile:u1", 60, r#"{"preferences": ["喜欢咖啡"]}"#).await.unwrap();

        let harness = build(kv, vector);
        let started = std::time::Instant::now();
        let _ = harness.unified.get_conversation_context("u1", "c1", "你好", 3).await;
        let elapsed = started.elapsed();

        // Each tier pays ~100ms; serial execution would be ~300ms
        assert!(
            elapsed < Duration::from_millis(250),
            "expected parallel fan-out, took {elapsed:?}"
        );
    }

    async fn futures_embed(embedder: &HashEmbedder, text: &str) -> Vec<f32> {
        use chat_agent_llm::Embedder;
        embedder.embed(text).await.unwrap()
    }

    #[tokio::test]
    async fn test_process_conversation_writes_both_tiers() {
        let harness = build(Arc::new(InMemoryStore::new()), Arc::new(InMemoryVectorStore::new()));
        // The write fan-out runs profile extraction on the signal-bearing message
        harness.llm.push_generation("{}");

        let message = "我的咖啡偏好很重要，必须记住：我喜欢手冲咖啡，这是关键选择。";
        let response = "明白了，已经记录你的咖啡偏好，手冲咖啡是你的首选。".repeat(5);
        let outcome = harness
            .unified
            .process_conversation("u1", "c1", message, &response, "search", &[])
            .await;

        assert!(outcome.success);
        assert!(outcome.short_term_stored);
        assert!(outcome.long_term.stored, "reason: {}", outcome.long_term.reason);

        // Both tiers observable afterwards
        let context = harness.unified.get_conversation_context("u1", "c1", "咖啡", 3).await;
        assert!(context.full_context.contains("最近对话："));
    }
}
