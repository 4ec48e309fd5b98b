//! Vector store adapter
//!
//! Named collections over Qdrant with cosine similarity. Every search is
//! filtered on `user_id` keyword equality; payloads carry the semantic
//! memory record. An exact in-memory implementation backs tests and
//! degraded wiring.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use qdrant_client::qdrant::{
    value::Kind, Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance,
    FieldCondition, Filter, ListValue, Match, PointId, PointStruct, PointsIdsList,
    SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::MemoryError;

/// Payload of one semantic memory entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    pub user_id: String,
    pub conversation_id: String,
    pub content: String,
    pub importance_score: f32,
    pub intent: String,
    #[serde(default)]
    pub sources: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub memory_type: String,
    /// Read during ranking when tracked; nothing increments it yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_count: Option<u32>,
}

impl MemoryRecord {
    pub fn semantic(
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
        content: impl Into<String>,
        importance_score: f32,
        intent: impl Into<String>,
        sources: Vec<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            content: content.into(),
            importance_score,
            intent: intent.into(),
            sources,
            created_at: Utc::now(),
            memory_type: "semantic".to_string(),
            access_count: None,
        }
    }
}

/// One search hit
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub id: String,
    /// Cosine similarity to the query
    pub score: f32,
    pub record: MemoryRecord,
}

/// Vector store interface
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if missing (cosine distance)
    async fn ensure_collection(&self, name: &str, dim: usize) -> Result<(), MemoryError>;

    async fn upsert(
        &self,
        collection: &str,
        id: Uuid,
        vector: Vec<f32>,
        record: MemoryRecord,
    ) -> Result<(), MemoryError>;

    /// Cosine top-k filtered on `user_id`, dropping hits below `min_score`
    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
        user_id: &str,
        min_score: f32,
    ) -> Result<Vec<ScoredMemory>, MemoryError>;

    async fn delete(&self, collection: &str, id: Uuid) -> Result<(), MemoryError>;

    async fn health(&self) -> bool;
}

/// Qdrant-backed store
pub struct QdrantStore {
    client: Qdrant,
}

impl QdrantStore {
    pub fn connect(endpoint: &str, api_key: Option<&str>) -> Result<Self, MemoryError> {
        let mut builder = Qdrant::from_url(endpoint);
        if let Some(key) = api_key {
            builder = builder.api_key(key.to_string());
        }
        let client = builder.build().map_err(|e| MemoryError::Vector(e.to_string()))?;
        Ok(Self { client })
    }

    fn payload_from_record(record: &MemoryRecord) -> HashMap<String, Value> {
        let mut payload: HashMap<String, Value> = HashMap::new();
        payload.insert("user_id".to_string(), record.user_id.clone().into());
        payload.insert("conversation_id".to_string(), record.conversation_id.clone().into());
        payload.insert("content".to_string(), record.content.clone().into());
        payload.insert("importance_score".to_string(), (record.importance_score as f64).into());
        payload.insert("intent".to_string(), record.intent.clone().into());
        payload.insert(
            "sources".to_string(),
            Value {
                kind: Some(Kind::ListValue(ListValue {
                    values: record.sources.iter().map(|s| Value::from(s.clone())).collect(),
                })),
            },
        );
        payload.insert("created_at".to_string(), record.created_at.to_rfc3339().into());
        payload.insert("memory_type".to_string(), record.memory_type.clone().into());
        if let Some(count) = record.access_count {
            payload.insert("access_count".to_string(), (count as i64).into());
        }
        payload
    }

    fn record_from_payload(payload: HashMap<String, Value>) -> Option<MemoryRecord> {
        fn string_of(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
            match payload.get(key)?.kind.as_ref()? {
                Kind::StringValue(s) => Some(s.clone()),
                _ => None,
            }
        }
        fn double_of(payload: &HashMap<String, Value>, key: &str) -> Option<f64> {
            match payload.get(key)?.kind.as_ref()? {
                Kind::DoubleValue(d) => Some(*d),
                Kind::IntegerValue(i) => Some(*i as f64),
                _ => None,
            }
        }

        let created_at = string_of(&payload, "created_at")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let sources = match payload.get("sources").and_then(|v| v.kind.as_ref()) {
            Some(Kind::ListValue(list)) => list
                .values
                .iter()
                .filter_map(|v| match v.kind.as_ref() {
                    Some(Kind::StringValue(s)) => Some(s.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        Some(MemoryRecord {
            user_id: string_of(&payload, "user_id")?,
            conversation_id: string_of(&payload, "conversation_id").unwrap_or_default(),
            content: string_of(&payload, "content").unwrap_or_default(),
            importance_score: double_of(&payload, "importance_score").unwrap_or(0.0) as f32,
            intent: string_of(&payload, "intent").unwrap_or_default(),
            sources,
            created_at,
            memory_type: string_of(&payload, "memory_type").unwrap_or_default(),
            access_count: double_of(&payload, "access_count").map(|c| c as u32),
        })
    }

    fn user_filter(user_id: &str) -> Filter {
        Filter {
            must: vec![Condition {
                condition_one_of: Some(qdrant_client::qdrant::condition::ConditionOneOf::Field(
                    FieldCondition {
                        key: "user_id".to_string(),
                        r#match: Some(Match {
                            match_value: Some(qdrant_client::qdrant::r#match::MatchValue::Keyword(
                                user_id.to_string(),
                            )),
                        }),
                        ..Default::default()
                    },
                )),
            }],
            ..Default::default()
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, name: &str, dim: usize) -> Result<(), MemoryError> {
        let exists = self
            .client
            .collection_exists(name)
            .await
            .map_err(|e| MemoryError::Vector(e.to_string()))?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(name).vectors_config(VectorParamsBuilder::new(
                        dim as u64,
                        Distance::Cosine,
                    )),
                )
                .await
                .map_err(|e| MemoryError::Vector(e.to_string()))?;
            tracing::info!(collection = name, dim, "created vector collection");
        }

        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        id: Uuid,
        vector: Vec<f32>,
        record: MemoryRecord,
    ) -> Result<(), MemoryError> {
        let point = PointStruct::new(id.to_string(), vector, Self::payload_from_record(&record));

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, vec![point]))
            .await
            .map_err(|e| MemoryError::Vector(e.to_string()))?;

        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
        user_id: &str,
        min_score: f32,
    ) -> Result<Vec<ScoredMemory>, MemoryError> {
        let builder = SearchPointsBuilder::new(collection, query.to_vec(), k as u64)
            .with_payload(true)
            .filter(Self::user_filter(user_id))
            .score_threshold(min_score);

        let results = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| MemoryError::Vector(e.to_string()))?;

        Ok(results
            .result
            .into_iter()
            .filter_map(|point| {
                let id = point
                    .id
                    .as_ref()
                    .and_then(|pid| match &pid.point_id_options {
                        Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u)) => {
                            Some(u.clone())
                        },
                        Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(n)) => {
                            Some(n.to_string())
                        },
                        None => None,
                    })
                    .unwrap_or_default();
                let record = Self::record_from_payload(point.payload)?;
                Some(ScoredMemory { id, score: point.score, record })
            })
            .collect())
    }

    async fn delete(&self, collection: &str, id: Uuid) -> Result<(), MemoryError> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(PointsIdsList { ids: vec![PointId::from(id.to_string())] }),
            )
            .await
            .map_err(|e| MemoryError::Vector(e.to_string()))?;
        Ok(())
    }

    async fn health(&self) -> bool {
        self.client.health_check().await.is_ok()
    }
}

struct InMemoryPoint {
    id: Uuid,
    vector: Vec<f32>,
    record: MemoryRecord,
}

/// Exact-cosine in-memory store
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: DashMap<String, Vec<InMemoryPoint>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of points in a collection, for assertions
    pub fn point_count(&self, collection: &str) -> usize {
        self.collections.get(collection).map(|c| c.len()).unwrap_or(0)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_collection(&self, name: &str, _dim: usize) -> Result<(), MemoryError> {
        self.collections.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        id: Uuid,
        vector: Vec<f32>,
        record: MemoryRecord,
    ) -> Result<(), MemoryError> {
        let mut points = self.collections.entry(collection.to_string()).or_default();
        points.retain(|p| p.id != id);
        points.push(InMemoryPoint { id, vector, record });
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
        user_id: &str,
        min_score: f32,
    ) -> Result<Vec<ScoredMemory>, MemoryError> {
        let Some(points) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<ScoredMemory> = points
            .iter()
            .filter(|p| p.record.user_id == user_id)
            .map(|p| ScoredMemory {
                id: p.id.to_string(),
                score: cosine_similarity(query, &p.vector),
                record: p.record.clone(),
            })
            .filter(|hit| hit.score >= min_score)
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, collection: &str, id: Uuid) -> Result<(), MemoryError> {
        if let Some(mut points) = self.collections.get_mut(collection) {
            points.retain(|p| p.id != id);
        }
        Ok(())
    }

    async fn health(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user: &str, content: &str, importance: f32) -> MemoryRecord {
        MemoryRecord::semantic(user, "c1", content, importance, "normal", Vec::new())
    }

    #[test]
    fn test_record_json_round_trip() {
        let original = record("u1", "问题：你好\n回答：你好！", 0.7);
        let encoded = serde_json::to_string(&original).unwrap();
        let decoded: MemoryRecord = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[tokio::test]
    async fn test_upsert_then_search_self_is_exact() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("semantic_memory", 4).await.unwrap();

        let id = Uuid::new_v4();
        let vector = vec![0.1, 0.4, 0.2, 0.8];
        store
            .upsert("semantic_memory", id, vector.clone(), record("u1", "咖啡偏好", 0.82))
            .await
            .unwrap();

        let hits = store.search("semantic_memory", &vector, 5, "u1", 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score >= 0.999);
        assert_eq!(hits[0].record.content, "咖啡偏好");
    }

    #[tokio::test]
    async fn test_search_is_user_filtered() {
        let store = InMemoryVectorStore::new();
        let vector = vec![1.0, 0.0];
        store
            .upsert("semantic_memory", Uuid::new_v4(), vector.clone(), record("u1", "a", 0.9))
            .await
            .unwrap();

        let hits = store.search("semantic_memory", &vector, 5, "other_user", 0.0).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_min_score_filters() {
        let store = InMemoryVectorStore::new();
        store
            .upsert("semantic_memory", Uuid::new_v4(), vec![1.0, 0.0], record("u1", "a", 0.9))
            .await
            .unwrap();

        // Orthogonal query scores 0.0
        let hits = store.search("semantic_memory", &[0.0, 1.0], 5, "u1", 0.7).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_same_id_replaces() {
        let store = InMemoryVectorStore::new();
        let id = Uuid::new_v4();
        store
            .upsert("semantic_memory", id, vec![1.0, 0.0], record("u1", "old", 0.5))
            .await
            .unwrap();
        store
            .upsert("semantic_memory", id, vec![1.0, 0.0], record("u1", "new", 0.6))
            .await
            .unwrap();

        assert_eq!(store.point_count("semantic_memory"), 1);
        let hits = store.search("semantic_memory", &[1.0, 0.0], 5, "u1", 0.0).await.unwrap();
        assert_eq!(hits[0].record.content, "new");
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryVectorStore::new();
        let id = Uuid::new_v4();
        store
            .upsert("semantic_memory", id, vec![1.0], record("u1", "a", 0.9))
            .await
            .unwrap();
        store.delete("semantic_memory", id).await.unwrap();
        assert_eq!(store.point_count("semantic_memory"), 0);
    }

    #[test]
    fn test_qdrant_payload_round_trip() {
        let original = MemoryRecord {
            access_count: Some(3),
            sources: vec!["https://example.com".to_string()],
            ..record("u1", "内容", 0.75)
        };
        let payload = QdrantStore::payload_from_record(&original);
        let decoded = QdrantStore::record_from_payload(payload).unwrap();

        assert_eq!(decoded.user_id, original.user_id);
        assert_eq!(decoded.content, original.content);
        assert_eq!(decoded.sources, original.sources);
        assert_eq!(decoded.access_count, Some(3));
        assert!((decoded.importance_score - 0.75).abs() < 1e-6);
    }
}
