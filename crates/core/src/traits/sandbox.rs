//! Python sandbox seam
//!
//! Code-intent requests hand generated Python to an external sandbox. The
//! pipeline only sees the outcome: stdout, an optional error, and produced
//! image artifacts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An image artifact produced by code execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxImage {
    pub url: String,
    pub filename: String,
}

/// Result of one sandbox run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxOutcome {
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub images: Vec<SandboxImage>,
}

/// Interface to the Python execution sandbox
#[async_trait]
pub trait CodeSandbox: Send + Sync {
    async fn execute(&self, code: &str, user_id: &str) -> Result<SandboxOutcome>;
}

/// Sandbox stand-in used when no executor is wired
///
/// Always fails; the orchestrator turns this into a user-visible error event
/// rather than streaming raw code.
pub struct DisabledSandbox;

#[async_trait]
impl CodeSandbox for DisabledSandbox {
    async fn execute(&self, _code: &str, _user_id: &str) -> Result<SandboxOutcome> {
        Err(Error::Sandbox("code execution is not configured".to_string()))
    }
}
