//! Long-term memory
//!
//! Importance-gated semantic storage: turns scoring above the threshold are
//! embedded and written to the vector store. Recall merges a semantic search
//! with an intent-match pass and ranks by a composite of similarity,
//! importance, and recency.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use chat_agent_llm::Embedder;

use crate::importance::{ImportanceScorer, ScoreContext};
use crate::vector_store::{MemoryRecord, ScoredMemory, VectorStore};

/// Long-term memory configuration
#[derive(Debug, Clone)]
pub struct LongTermConfig {
    pub enabled: bool,
    /// Storage threshold on the importance score
    pub min_importance_score: f32,
    pub collection: String,
    /// Similarity floor applied to the semantic search
    pub min_similarity: f32,
}

impl Default for LongTermConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_importance_score: 0.6,
            collection: "semantic_memory".to_string(),
            min_similarity: 0.7,
        }
    }
}

/// Outcome of one storage decision
#[derive(Debug, Clone)]
pub struct StorageOutcome {
    pub stored: bool,
    pub memory_id: Option<Uuid>,
    pub importance_score: f32,
    pub reason: String,
}

impl StorageOutcome {
    fn skipped(importance_score: f32, reason: impl Into<String>) -> Self {
        Self { stored: false, memory_id: None, importance_score, reason: reason.into() }
    }
}

/// One recalled memory, ranked
#[derive(Debug, Clone)]
pub struct RecalledMemory {
    pub id: String,
    pub content: String,
    pub similarity: f32,
    pub importance_score: f32,
    pub intent: String,
    pub created_at: DateTime<Utc>,
    pub rank_score: f32,
}

impl RecalledMemory {
    /// Compressed single-line rendering for context assembly
    pub fn compressed_line(&self) -> String {
        let preview: String = self.content.graphemes(true).take(100).collect();
        format!("[重要性: {:.2}] {preview}...", self.importance_score)
    }
}

/// Long-term memory over the vector store
pub struct LongTermMemory {
    vector: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    scorer: ImportanceScorer,
    config: LongTermConfig,
}

impl LongTermMemory {
    pub fn new(
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: LongTermConfig,
    ) -> Self {
        Self { vector, embedder, scorer: ImportanceScorer::new(), config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Score one turn and store it when it clears the threshold
    pub async fn process_for_storage(
        &self,
        user_id: &str,
        conversation_id: &str,
        message: &str,
        response: &str,
        intent: &str,
        sources: &[String],
    ) -> StorageOutcome {
        if !self.config.enabled {
            return StorageOutcome::skipped(0.0, "long-term memory disabled");
        }

        let importance =
            self.scorer.score(message, response, intent, &ScoreContext::single_turn());

        if importance < self.config.min_importance_score {
            return StorageOutcome::skipped(
                importance,
                format!(
                    "importance {importance:.2} below threshold {}",
                    self.config.min_importance_score
                ),
            );
        }

        let content = format!("问题：{message}\n回答：{response}");
        let embedding = match self.embedder.embed(&content).await {
            Ok(embedding) if !embedding.is_empty() => embedding,
            Ok(_) => return StorageOutcome::skipped(importance, "empty embedding"),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "embedding failed, storage skipped");
                return StorageOutcome::skipped(importance, format!("embedding failed: {e}"));
            },
        };

        let memory_id = Uuid::new_v4();
        let record = MemoryRecord::semantic(
            user_id,
            conversation_id,
            content,
            importance,
            intent,
            sources.to_vec(),
        );

        if let Err(e) = self.vector.upsert(&self.config.collection, memory_id, embedding, record).await
        {
            tracing::warn!(user_id, error = %e, "semantic memory write failed");
            return StorageOutcome::skipped(importance, format!("vector write failed: {e}"));
        }

        tracing::info!(user_id, conversation_id, %memory_id, importance, "semantic memory stored");
        StorageOutcome {
            stored: true,
            memory_id: Some(memory_id),
            importance_score: importance,
            reason: "importance threshold met".to_string(),
        }
    }

    /// Semantic recall for one user
    ///
    /// Composite rank: `0.3·similarity + 0.4·importance + 0.3·recency`, with
    /// a small access bonus when tracked. Recency decays linearly over one
    /// year. Results are deduplicated by content.
    pub async fn search_relevant(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
        min_importance: f32,
        time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Vec<RecalledMemory> {
        if !self.config.enabled || limit == 0 {
            return Vec::new();
        }

        let embedding = match self.embedder.embed(query).await {
            Ok(embedding) if !embedding.is_empty() => embedding,
            Ok(_) => return Vec::new(),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "query embedding failed");
                return Vec::new();
            },
        };

        let semantic = self
            .vector
            .search(
                &self.config.collection,
                &embedding,
                limit * 2,
                user_id,
                self.config.min_similarity,
            )
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(user_id, error = %e, "semantic search failed");
                Vec::new()
            });

        // Second pass surfacing turns whose recorded intent appears in the
        // query, regardless of similarity
        let intent_hits = self
            .vector
            .search(&self.config.collection, &embedding, (limit / 2).max(1), user_id, 0.0)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|hit| !hit.record.intent.is_empty() && query.contains(&hit.record.intent))
            .collect::<Vec<_>>();

        let now = Utc::now();
        let mut best: HashMap<String, RecalledMemory> = HashMap::new();

        for hit in semantic.into_iter().chain(intent_hits) {
            if hit.record.importance_score < min_importance {
                continue;
            }
            if let Some((start, end)) = time_range {
                if hit.record.created_at < start || hit.record.created_at > end {
                    continue;
                }
            }

            let memory = rank(hit, now);
            match best.get(&memory.content) {
                Some(existing) if existing.rank_score >= memory.rank_score => {},
                _ => {
                    best.insert(memory.content.clone(), memory);
                },
            }
        }

        let mut memories: Vec<RecalledMemory> = best.into_values().collect();
        memories
            .sort_by(|a, b| b.rank_score.partial_cmp(&a.rank_score).unwrap_or(std::cmp::Ordering::Equal));
        memories.truncate(limit);

        tracing::debug!(user_id, count = memories.len(), "semantic recall complete");
        memories
    }
}

fn rank(hit: ScoredMemory, now: DateTime<Utc>) -> RecalledMemory {
    let age_days = (now - hit.record.created_at).num_days().max(0) as f32;
    let recency = (1.0 - age_days / 365.0).max(0.0);
    let access_bonus = hit
        .record
        .access_count
        .map(|count| (count as f32 * 0.01).min(0.1))
        .unwrap_or(0.0);

    let rank_score = 0.3 * hit.score + 0.4 * hit.record.importance_score + 0.3 * recency
        + access_bonus;

    RecalledMemory {
        id: hit.id,
        content: hit.record.content,
        similarity: hit.score,
        importance_score: hit.record.importance_score,
        intent: hit.record.intent,
        created_at: hit.record.created_at,
        rank_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_agent_llm::HashEmbedder;
    use crate::vector_store::InMemoryVectorStore;

    fn memory_with(vector: Arc<InMemoryVectorStore>) -> LongTermMemory {
        LongTermMemory::new(vector, Arc::new(HashEmbedder::default()), LongTermConfig::default())
    }

    #[tokio::test]
    async fn test_low_importance_is_not_stored() {
        let vector = Arc::new(InMemoryVectorStore::new());
        let memory = memory_with(vector.clone());

        let outcome = memory
            .process_for_storage("u1", "c1", "你好", "你好！", "normal", &[])
            .await;

        assert!(!outcome.stored);
        assert!(outcome.importance_score < 0.6);
        assert_eq!(vector.point_count("semantic_memory"), 0);
    }

    #[tokio::test]
    async fn test_high_importance_is_stored() {
        let vector = Arc::new(InMemoryVectorStore::new());
        let memory = memory_with(vector.clone());

        let message = "我的咖啡偏好很重要，必须记住：我喜欢手冲咖啡，不喜欢速溶，这是关键选择。";
        let response = "明白了，已经记录你的咖啡偏好。".repeat(10);
        let outcome = memory
            .process_for_storage("u1", "c1", message, &response, "search", &[])
            .await;

        assert!(outcome.stored, "reason: {}", outcome.reason);
        assert!(outcome.memory_id.is_some());
        assert!(outcome.importance_score >= 0.6);
        assert_eq!(vector.point_count("semantic_memory"), 1);
    }

    #[tokio::test]
    async fn test_disabled_memory_stores_nothing() {
        let vector = Arc::new(InMemoryVectorStore::new());
        let memory = LongTermMemory::new(
            vector.clone(),
            Arc::new(HashEmbedder::default()),
            LongTermConfig { enabled: false, ..LongTermConfig::default() },
        );

        let outcome = memory
            .process_for_storage("u1", "c1", "重要重要重要", "好的", "search", &[])
            .await;
        assert!(!outcome.stored);
        assert!(memory.search_relevant("u1", "重要", 5, 0.0, None).await.is_empty());
    }

    /// Seed one memory whose vector is the embedding of `embed_text`
    async fn seed_as(
        vector: &InMemoryVectorStore,
        embedder: &HashEmbedder,
        user_id: &str,
        embed_text: &str,
        content: &str,
        importance: f32,
        intent: &str,
    ) {
        let embedding = embedder.embed(embed_text).await.unwrap();
        vector
            .upsert(
                "semantic_memory",
                Uuid::new_v4(),
                embedding,
                MemoryRecord::semantic(user_id, "c1", content, importance, intent, Vec::new()),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_recall_is_user_isolated() {
        let vector = Arc::new(InMemoryVectorStore::new());
        let embedder = HashEmbedder::default();
        seed_as(
            &vector,
            &embedder,
            "u1",
            "咖啡偏好",
            "问题：咖啡偏好\n回答：手冲咖啡",
            0.82,
            "normal",
        )
        .await;

        let memory = memory_with(vector);

        let own = memory.search_relevant("u1", "咖啡偏好", 5, 0.0, None).await;
        assert_eq!(own.len(), 1);
        assert!((own[0].importance_score - 0.82).abs() < 1e-6);
        assert!(own[0].compressed_line().starts_with("[重要性: 0.82]"));
        assert!(own[0].compressed_line().contains("咖啡"));

        let other = memory.search_relevant("u2", "咖啡偏好", 5, 0.0, None).await;
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_recall_exact_match_ranks_first() {
        let vector = Arc::new(InMemoryVectorStore::new());
        let embedder = HashEmbedder::default();
        seed_as(&vector, &embedder, "u1", "咖啡偏好记录", "咖啡偏好记录", 0.8, "normal").await;
        seed_as(
            &vector,
            &embedder,
            "u1",
            "完全无关的一条旧记忆内容",
            "完全无关的一条旧记忆内容",
            0.8,
            "normal",
        )
        .await;

        let memory = memory_with(vector);
        let results = memory.search_relevant("u1", "咖啡偏好记录", 5, 0.0, None).await;

        assert!(!results.is_empty());
        assert_eq!(results[0].content, "咖啡偏好记录");
    }

    #[tokio::test]
    async fn test_recall_dedups_by_content() {
        let vector = Arc::new(InMemoryVectorStore::new());
        let embedder = HashEmbedder::default();
        seed_as(&vector, &embedder, "u1", "同一条内容", "同一条内容", 0.7, "normal").await;
        seed_as(&vector, &embedder, "u1", "同一条内容", "同一条内容", 0.9, "normal").await;

        let memory = memory_with(vector);
        let results = memory.search_relevant("u1", "同一条内容", 5, 0.0, None).await;

        assert_eq!(results.len(), 1);
        // The higher-ranked duplicate survives
        assert!((results[0].importance_score - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_recall_min_importance_filter() {
        let vector = Arc::new(InMemoryVectorStore::new());
        let embedder = HashEmbedder::default();
        seed_as(&vector, &embedder, "u1", "咖啡偏好", "咖啡偏好", 0.3, "normal").await;

        let memory = memory_with(vector);
        let results = memory.search_relevant("u1", "咖啡偏好", 5, 0.5, None).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_intent_pass_surfaces_low_similarity_hits() {
        let vector = Arc::new(InMemoryVectorStore::new());
        let embedder = HashEmbedder::default();
        // Content dissimilar to the query, but intent "search" appears in it
        seed_as(
            &vector,
            &embedder,
            "u1",
            "天气晴朗的记录",
            "问题：天气如何\n回答：晴天",
            0.9,
            "search",
        )
        .await;

        let memory = memory_with(vector);
        let results = memory.search_relevant("u1", "帮我search一下新闻", 5, 0.0, None).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].intent, "search");
    }
}
