//! Configuration management for the chat agent
//!
//! Supports loading configuration from:
//! - YAML files (config/default.yaml, config/{env}.yaml)
//! - Environment variables (flat keys such as MEMORY_MAX_TOKENS,
//!   SHORT_TERM_MEMORY_ENABLED, DASHSCOPE_API_KEY)

pub mod settings;

pub use settings::{
    load_settings, EmbeddingSettings, FetchSettings, KvSettings, LlmSettings, MemorySettings,
    ObservabilitySettings, SearchSettings, ServerSettings, Settings, VectorSettings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
