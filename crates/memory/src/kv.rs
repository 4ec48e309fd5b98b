//! Key/value store adapter
//!
//! Narrow typed surface over a Redis-like store. All list entries are UTF-8
//! JSON; keys follow the namespace in `keys`. Adapters never panic: every
//! method returns an error or an empty result and callers decide on
//! fallbacks.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;

use crate::MemoryError;

/// Key namespace builders
pub mod keys {
    use crate::summary::SummaryLevel;

    /// `profile:<user>` — JSON profile record, 7-day TTL
    pub fn profile(user_id: &str) -> String {
        format!("profile:{user_id}")
    }

    /// `conversation:<user>:<conv>` — JSON turn list, 7-day TTL, capped at 100
    pub fn conversation(user_id: &str, conversation_id: &str) -> String {
        format!("conversation:{user_id}:{conversation_id}")
    }

    /// `conversation_summary:<user>:<conv>:<level>` — layer summary, 30-day TTL
    pub fn summary(user_id: &str, conversation_id: &str, level: SummaryLevel) -> String {
        format!("conversation_summary:{user_id}:{conversation_id}:{}", level.as_str())
    }
}

/// Typed operations over the key/value store
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, MemoryError>;

    /// Set with a TTL in seconds
    async fn set_ex(&self, key: &str, ttl_seconds: u64, value: &str) -> Result<(), MemoryError>;

    async fn del(&self, key: &str) -> Result<(), MemoryError>;

    /// Push to the head of a list
    async fn lpush(&self, key: &str, value: &str) -> Result<(), MemoryError>;

    /// Keep only the first `n` entries of a list
    async fn ltrim(&self, key: &str, n: usize) -> Result<(), MemoryError>;

    /// First `n` entries of a list (head = most recently pushed)
    async fn lrange(&self, key: &str, n: usize) -> Result<Vec<String>, MemoryError>;

    /// Reset a key's TTL in seconds
    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), MemoryError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, MemoryError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), MemoryError>;

    /// Pattern scan; maintenance only, never on the request path
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, MemoryError>;

    async fn ping(&self) -> bool;
}

/// Redis-backed store over a shared connection manager
#[derive(Clone)]
pub struct RedisStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis; the connection manager reconnects on failure
    pub async fn connect(url: &str) -> Result<Self, MemoryError> {
        let client = redis::Client::open(url).map_err(|e| MemoryError::Kv(e.to_string()))?;
        let manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| MemoryError::Kv(e.to_string()))?;
        tracing::info!(url, "connected to Redis");
        Ok(Self { manager })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, MemoryError> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(|e| MemoryError::Kv(e.to_string()))
    }

    async fn set_ex(&self, key: &str, ttl_seconds: u64, value: &str) -> Result<(), MemoryError> {
        let mut conn = self.manager.clone();
        conn.set_ex(key, value, ttl_seconds)
            .await
            .map_err(|e| MemoryError::Kv(e.to_string()))
    }

    async fn del(&self, key: &str) -> Result<(), MemoryError> {
        let mut conn = self.manager.clone();
        conn.del(key).await.map_err(|e| MemoryError::Kv(e.to_string()))
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), MemoryError> {
        let mut conn = self.manager.clone();
        conn.lpush(key, value).await.map_err(|e| MemoryError::Kv(e.to_string()))
    }

    async fn ltrim(&self, key: &str, n: usize) -> Result<(), MemoryError> {
        let mut conn = self.manager.clone();
        conn.ltrim(key, 0, n as isize - 1)
            .await
            .map_err(|e| MemoryError::Kv(e.to_string()))
    }

    async fn lrange(&self, key: &str, n: usize) -> Result<Vec<String>, MemoryError> {
        let mut conn = self.manager.clone();
        conn.lrange(key, 0, n as isize - 1)
            .await
            .map_err(|e| MemoryError::Kv(e.to_string()))
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), MemoryError> {
        let mut conn = self.manager.clone();
        conn.expire(key, ttl_seconds as i64)
            .await
            .map_err(|e| MemoryError::Kv(e.to_string()))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, MemoryError> {
        let mut conn = self.manager.clone();
        conn.hgetall(key).await.map_err(|e| MemoryError::Kv(e.to_string()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), MemoryError> {
        let mut conn = self.manager.clone();
        conn.hset(key, field, value)
            .await
            .map_err(|e| MemoryError::Kv(e.to_string()))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, MemoryError> {
        let mut conn = self.manager.clone();
        conn.keys(pattern).await.map_err(|e| MemoryError::Kv(e.to_string()))
    }

    async fn ping(&self) -> bool {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}

enum InMemoryValue {
    String(String),
    List(Vec<String>),
    Hash(HashMap<String, String>),
}

/// In-memory store
///
/// Fallback when Redis is unreachable and the default in tests. TTLs are
/// accepted but not enforced.
#[derive(Default)]
pub struct InMemoryStore {
    entries: DashMap<String, InMemoryValue>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full list length, for assertions
    pub fn list_len(&self, key: &str) -> usize {
        match self.entries.get(key).as_deref() {
            Some(InMemoryValue::List(list)) => list.len(),
            _ => 0,
        }
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, MemoryError> {
        match self.entries.get(key).as_deref() {
            Some(InMemoryValue::String(value)) => Ok(Some(value.clone())),
            _ => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, _ttl_seconds: u64, value: &str) -> Result<(), MemoryError> {
        self.entries
            .insert(key.to_string(), InMemoryValue::String(value.to_string()));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), MemoryError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), MemoryError> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| InMemoryValue::List(Vec::new()));
        if let InMemoryValue::List(list) = entry.value_mut() {
            list.insert(0, value.to_string());
        }
        Ok(())
    }

    async fn ltrim(&self, key: &str, n: usize) -> Result<(), MemoryError> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if let InMemoryValue::List(list) = entry.value_mut() {
                list.truncate(n);
            }
        }
        Ok(())
    }

    async fn lrange(&self, key: &str, n: usize) -> Result<Vec<String>, MemoryError> {
        match self.entries.get(key).as_deref() {
            Some(InMemoryValue::List(list)) => Ok(list.iter().take(n).cloned().collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn expire(&self, _key: &str, _ttl_seconds: u64) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, MemoryError> {
        match self.entries.get(key).as_deref() {
            Some(InMemoryValue::Hash(hash)) => Ok(hash.clone()),
            _ => Ok(HashMap::new()),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), MemoryError> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| InMemoryValue::Hash(HashMap::new()));
        if let InMemoryValue::Hash(hash) = entry.value_mut() {
            hash.insert(field.to_string(), value.to_string());
        }
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, MemoryError> {
        // Only the trailing-* form is needed by maintenance paths
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        Ok(self
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    async fn ping(&self) -> bool {
        true
    }
}
