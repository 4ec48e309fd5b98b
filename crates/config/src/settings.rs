//! Main settings module
//!
//! File layering (config/default.yaml, then config/{env}.yaml) followed by
//! explicit overrides from the flat environment keys the deployment exposes.

use config::{Config, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Environment name the settings were loaded for
    #[serde(default)]
    pub environment: String,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub embedding: EmbeddingSettings,

    #[serde(default)]
    pub kv: KvSettings,

    #[serde(default)]
    pub vector: VectorSettings,

    #[serde(default)]
    pub memory: MemorySettings,

    #[serde(default)]
    pub search: SearchSettings,

    #[serde(default)]
    pub fetch: FetchSettings,

    #[serde(default)]
    pub observability: ObservabilitySettings,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL prepended to relative artifact URLs in persisted responses
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_public_base_url() -> String {
    "http://localhost:3001".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_base_url: default_public_base_url(),
        }
    }
}

/// Text-generation upstream settings (DashScope / Qwen)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_api_url")]
    pub api_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,
}

fn default_llm_api_url() -> String {
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation".to_string()
}

fn default_llm_model() -> String {
    "qwen-turbo".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    3000
}

fn default_top_p() -> f32 {
    0.8
}

fn default_repetition_penalty() -> f32 {
    1.1
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: default_llm_api_url(),
            model: default_llm_model(),
            timeout_seconds: default_llm_timeout(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            repetition_penalty: default_repetition_penalty(),
        }
    }
}

/// Embedding upstream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    #[serde(default = "default_embedding_api_url")]
    pub api_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dim")]
    pub dim: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_seconds: u64,
}

fn default_embedding_api_url() -> String {
    "https://dashscope.aliyuncs.com/api/v1/services/embeddings/text-embedding/text-embedding"
        .to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-v1".to_string()
}

fn default_embedding_dim() -> usize {
    1536
}

fn default_embedding_batch_size() -> usize {
    10
}

fn default_embedding_timeout() -> u64 {
    30
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            api_url: default_embedding_api_url(),
            model: default_embedding_model(),
            dim: default_embedding_dim(),
            batch_size: default_embedding_batch_size(),
            timeout_seconds: default_embedding_timeout(),
        }
    }
}

/// Key/value store settings (Redis)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvSettings {
    #[serde(default = "default_kv_host")]
    pub host: String,
    #[serde(default = "default_kv_port")]
    pub port: u16,
    #[serde(default)]
    pub db: u32,
    #[serde(default)]
    pub password: String,
}

fn default_kv_host() -> String {
    "localhost".to_string()
}

fn default_kv_port() -> u16 {
    6379
}

impl KvSettings {
    /// Connection URL in redis:// form
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!("redis://:{}@{}:{}/{}", self.password, self.host, self.port, self.db)
        }
    }
}

impl Default for KvSettings {
    fn default() -> Self {
        Self {
            host: default_kv_host(),
            port: default_kv_port(),
            db: 0,
            password: String::new(),
        }
    }
}

/// Vector store settings (Qdrant)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSettings {
    #[serde(default = "default_vector_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_vector_collection")]
    pub collection: String,
    #[serde(default = "default_embedding_dim")]
    pub dim: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_vector_endpoint() -> String {
    "http://localhost:6334".to_string()
}

fn default_vector_collection() -> String {
    "semantic_memory".to_string()
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self {
            endpoint: default_vector_endpoint(),
            collection: default_vector_collection(),
            dim: default_embedding_dim(),
            api_key: None,
        }
    }
}

/// Memory subsystem settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    #[serde(default = "default_true")]
    pub short_term_enabled: bool,
    #[serde(default = "default_true")]
    pub long_term_enabled: bool,
    /// Importance threshold for long-term storage
    #[serde(default = "default_min_importance")]
    pub min_importance_score: f32,
    /// Token estimate that triggers high-priority compression
    #[serde(default = "default_memory_max_tokens")]
    pub max_tokens: usize,
    /// Token estimate that triggers normal-priority compression
    #[serde(default = "default_memory_warning_tokens")]
    pub warning_tokens: usize,
    /// In-flight compression job cap
    #[serde(default = "default_compression_max_concurrent")]
    pub compression_max_concurrent: usize,
    /// Compression queue cap
    #[serde(default = "default_compression_queue_size")]
    pub compression_queue_size: usize,
    /// Turn list TTL in seconds
    #[serde(default = "default_conversation_ttl")]
    pub conversation_ttl_seconds: u64,
    /// Layer summary TTL in seconds
    #[serde(default = "default_summary_ttl")]
    pub summary_ttl_seconds: u64,
    /// Profile record TTL in seconds
    #[serde(default = "default_profile_ttl")]
    pub profile_ttl_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_min_importance() -> f32 {
    0.6
}

fn default_memory_max_tokens() -> usize {
    3000
}

fn default_memory_warning_tokens() -> usize {
    2500
}

fn default_compression_max_concurrent() -> usize {
    3
}

fn default_compression_queue_size() -> usize {
    100
}

fn default_conversation_ttl() -> u64 {
    86400 * 7
}

fn default_summary_ttl() -> u64 {
    86400 * 30
}

fn default_profile_ttl() -> u64 {
    86400 * 7
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            short_term_enabled: true,
            long_term_enabled: true,
            min_importance_score: default_min_importance(),
            max_tokens: default_memory_max_tokens(),
            warning_tokens: default_memory_warning_tokens(),
            compression_max_concurrent: default_compression_max_concurrent(),
            compression_queue_size: default_compression_queue_size(),
            conversation_ttl_seconds: default_conversation_ttl(),
            summary_ttl_seconds: default_summary_ttl(),
            profile_ttl_seconds: default_profile_ttl(),
        }
    }
}

/// Web-search settings (Tavily)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_search_max_results")]
    pub max_results: usize,
    #[serde(default = "default_search_depth")]
    pub search_depth: String,
    #[serde(default = "default_search_timeout")]
    pub timeout_seconds: u64,
}

fn default_search_max_results() -> usize {
    5
}

fn default_search_depth() -> String {
    "basic".to_string()
}

fn default_search_timeout() -> u64 {
    10
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            max_results: default_search_max_results(),
            search_depth: default_search_depth(),
            timeout_seconds: default_search_timeout(),
        }
    }
}

/// Page-fetch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_fetch_retries")]
    pub max_retries: u32,
    /// Extracted page text is truncated to this many characters
    #[serde(default = "default_fetch_max_content")]
    pub max_content_length: usize,
}

fn default_fetch_timeout() -> u64 {
    15
}

fn default_fetch_retries() -> u32 {
    3
}

fn default_fetch_max_content() -> usize {
    4000
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_fetch_timeout(),
            max_retries: default_fetch_retries(),
            max_content_length: default_fetch_max_content(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Settings {
    /// Sanity checks on values that would otherwise fail deep inside the
    /// memory subsystem
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory.warning_tokens > self.memory.max_tokens {
            return Err(ConfigError::InvalidValue {
                field: "memory.warning_tokens".to_string(),
                message: format!(
                    "warning threshold {} exceeds max {}",
                    self.memory.warning_tokens, self.memory.max_tokens
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.memory.min_importance_score) {
            return Err(ConfigError::InvalidValue {
                field: "memory.min_importance_score".to_string(),
                message: "must be within [0, 1]".to_string(),
            });
        }
        if self.memory.compression_max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                field: "memory.compression_max_concurrent".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Load settings from config files and environment variables
///
/// Priority: env vars > config/{env}.yaml > config/default.yaml > defaults.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    let config = builder.build()?;
    let mut settings: Settings = config.try_deserialize()?;
    if let Some(env_name) = env {
        settings.environment = env_name.to_string();
    }

    apply_env_overrides(&mut settings);
    settings.validate()?;

    Ok(settings)
}

/// Apply the flat environment keys the deployment exposes
fn apply_env_overrides(settings: &mut Settings) {
    override_parsed("HOST", &mut settings.server.host);
    override_parsed("PORT", &mut settings.server.port);

    override_parsed("DASHSCOPE_API_KEY", &mut settings.llm.api_key);
    override_parsed("QWEN_API_URL", &mut settings.llm.api_url);
    override_parsed("QWEN_MODEL", &mut settings.llm.model);
    override_parsed("QWEN_TIMEOUT_SECONDS", &mut settings.llm.timeout_seconds);

    override_parsed("EMBEDDING_MODEL", &mut settings.embedding.model);
    override_parsed("EMBEDDING_API_URL", &mut settings.embedding.api_url);

    override_parsed("REDIS_HOST", &mut settings.kv.host);
    override_parsed("REDIS_PORT", &mut settings.kv.port);
    override_parsed("REDIS_DB", &mut settings.kv.db);
    override_parsed("REDIS_PASSWORD", &mut settings.kv.password);

    override_parsed("QDRANT_ENDPOINT", &mut settings.vector.endpoint);
    override_parsed("QDRANT_COLLECTION", &mut settings.vector.collection);

    override_parsed("SHORT_TERM_MEMORY_ENABLED", &mut settings.memory.short_term_enabled);
    override_parsed("LONG_TERM_MEMORY_ENABLED", &mut settings.memory.long_term_enabled);
    override_parsed("LTM_MIN_IMPORTANCE_SCORE", &mut settings.memory.min_importance_score);
    override_parsed("MEMORY_MAX_TOKENS", &mut settings.memory.max_tokens);
    override_parsed("MEMORY_WARNING_TOKENS", &mut settings.memory.warning_tokens);
    override_parsed(
        "COMPRESSION_MAX_CONCURRENT",
        &mut settings.memory.compression_max_concurrent,
    );
    override_parsed("COMPRESSION_QUEUE_SIZE", &mut settings.memory.compression_queue_size);
    override_parsed("CONVERSATION_TTL_SECONDS", &mut settings.memory.conversation_ttl_seconds);
    override_parsed("SUMMARY_TTL_SECONDS", &mut settings.memory.summary_ttl_seconds);

    override_parsed("TAVILY_API_KEY", &mut settings.search.api_key);
}

fn override_parsed<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable env override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 3001);
        assert_eq!(settings.llm.model, "qwen-turbo");
        assert_eq!(settings.llm.timeout_seconds, 60);
        assert_eq!(settings.memory.max_tokens, 3000);
        assert_eq!(settings.memory.warning_tokens, 2500);
        assert_eq!(settings.memory.compression_max_concurrent, 3);
        assert_eq!(settings.memory.compression_queue_size, 100);
        assert_eq!(settings.memory.conversation_ttl_seconds, 86400 * 7);
        assert_eq!(settings.memory.summary_ttl_seconds, 86400 * 30);
        assert!((settings.memory.min_importance_score - 0.6).abs() < f32::EPSILON);
        assert!(settings.memory.short_term_enabled);
        assert!(settings.memory.long_term_enabled);
    }

    #[test]
    fn test_default_settings_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_inverted_thresholds() {
        let mut settings = Settings::default();
        settings.memory.warning_tokens = 5000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_out_of_range_importance() {
        let mut settings = Settings::default();
        settings.memory.min_importance_score = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_kv_url() {
        let settings = KvSettings::default();
        assert_eq!(settings.url(), "redis://localhost:6379/0");

        let with_password = KvSettings {
            password: "secret".to_string(),
            ..KvSettings::default()
        };
        assert_eq!(with_password.url(), "redis://:secret@localhost:6379/0");
    }

    #[test]
    fn test_generation_defaults_match_upstream() {
        let settings = LlmSettings::default();
        assert!((settings.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(settings.max_tokens, 3000);
        assert!((settings.top_p - 0.8).abs() < f32::EPSILON);
        assert!((settings.repetition_penalty - 1.1).abs() < f32::EPSILON);
    }
}
