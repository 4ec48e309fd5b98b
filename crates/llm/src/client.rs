//! DashScope text-generation client
//!
//! Two operations: single-shot `generate` and incremental SSE `stream`. Each
//! call opens its own upstream connection; the client is safe for parallel
//! use. A mid-stream failure is surfaced as one terminal chunk prefixed
//! `错误:` — the stream never half-closes silently.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use chat_agent_config::LlmSettings;

use crate::prompt::Message;
use crate::LlmError;

/// Generation parameters, overridable per call
#[derive(Debug, Clone, Serialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub repetition_penalty: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 3000,
            top_p: 0.8,
            repetition_penalty: 1.1,
        }
    }
}

impl GenerationParams {
    /// Low-temperature profile used for summaries and extraction
    pub fn deterministic() -> Self {
        Self { temperature: 0.3, ..Self::default() }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self {
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            top_p: settings.top_p,
            repetition_penalty: settings.repetition_penalty,
        }
    }
}

/// Text-generation client interface
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Single-shot generation
    async fn generate(&self, messages: &[Message], params: &GenerationParams)
        -> Result<String, LlmError>;

    /// Incremental streaming; chunks arrive on the returned receiver
    async fn stream(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<mpsc::Receiver<String>, LlmError>;
}

/// DashScope/Qwen client
pub struct QwenClient {
    client: reqwest::Client,
    settings: LlmSettings,
}

impl QwenClient {
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, settings })
    }

    fn headers(&self, streaming: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(auth) = HeaderValue::from_str(&format!("Bearer {}", self.settings.api_key)) {
            headers.insert(AUTHORIZATION, auth);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if streaming {
            headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
            headers.insert("X-DashScope-SSE", HeaderValue::from_static("enable"));
        }
        headers
    }

    fn request_body<'a>(
        &'a self,
        messages: &'a [Message],
        params: &GenerationParams,
        incremental: bool,
    ) -> QwenRequest<'a> {
        QwenRequest {
            model: &self.settings.model,
            input: QwenInput { messages },
            parameters: QwenParameters {
                temperature: params.temperature,
                max_tokens: params.max_tokens,
                top_p: params.top_p,
                repetition_penalty: params.repetition_penalty,
                incremental_output: incremental.then_some(true),
            },
        }
    }

    /// Map an upstream error response to a typed error
    async fn map_error(response: reqwest::Response) -> LlmError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        match status {
            StatusCode::UNAUTHORIZED => LlmError::AuthFailed,
            StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited,
            StatusCode::BAD_REQUEST => {
                let code = serde_json::from_str::<serde_json::Value>(&body)
                    .ok()
                    .and_then(|v| v.get("code").and_then(|c| c.as_str().map(String::from)));
                if code.as_deref() == Some("DataInspectionFailed") {
                    LlmError::ContentRejected
                } else {
                    LlmError::InvalidResponse(body)
                }
            },
            _ => LlmError::Unavailable(format!("HTTP {status}: {body}")),
        }
    }
}

#[async_trait]
impl LlmClient for QwenClient {
    async fn generate(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String, LlmError> {
        let response = self
            .client
            .post(&self.settings.api_url)
            .headers(self.headers(false))
            .json(&self.request_body(messages, params, false))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::map_error(response).await);
        }

        let body: QwenResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let text = body
            .output
            .and_then(|o| o.text)
            .ok_or_else(|| LlmError::InvalidResponse("missing output.text".to_string()))?;

        tracing::debug!(length = text.chars().count(), "generation complete");
        Ok(text)
    }

    async fn stream(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<mpsc::Receiver<String>, LlmError> {
        let response = self
            .client
            .post(&self.settings.api_url)
            .headers(self.headers(true))
            .json(&self.request_body(messages, params, true))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::map_error(response).await);
        }

        let (tx, rx) = mpsc::channel(32);
        let mut byte_stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = String::new();
            'read: while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        // Terminal error chunk, then close
                        let _ = tx.send(format!("错误: {e}")).await;
                        return;
                    },
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline).collect();
                    match parse_sse_line(line.trim()) {
                        SseLine::Done => break 'read,
                        SseLine::Chunk(text) => {
                            if tx.send(text).await.is_err() {
                                // Receiver dropped: client disconnected
                                return;
                            }
                        },
                        SseLine::Skip => {},
                    }
                }
            }
            tracing::debug!("stream complete");
        });

        Ok(rx)
    }
}

/// One parsed SSE line
#[derive(Debug, PartialEq)]
enum SseLine {
    /// Empty line, comment, or unparseable payload
    Skip,
    /// `data: [DONE]` terminator
    Done,
    /// A text chunk
    Chunk(String),
}

fn parse_sse_line(line: &str) -> SseLine {
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Skip;
    }
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(value) => {
            match value.get("output").and_then(|o| o.get("text")).and_then(|t| t.as_str()) {
                Some(text) if !text.is_empty() => SseLine::Chunk(text.to_string()),
                _ => SseLine::Skip,
            }
        },
        Err(_) => SseLine::Skip,
    }
}

// DashScope API types

#[derive(Debug, Serialize)]
struct QwenRequest<'a> {
    model: &'a str,
    input: QwenInput<'a>,
    parameters: QwenParameters,
}

#[derive(Debug, Serialize)]
struct QwenInput<'a> {
    messages: &'a [Message],
}

#[derive(Debug, Serialize)]
struct QwenParameters {
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    repetition_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    incremental_output: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct QwenResponse {
    #[serde(default)]
    output: Option<QwenOutput>,
}

#[derive(Debug, Deserialize)]
struct QwenOutput {
    #[serde(default)]
    text: Option<String>,
}

/// Scripted client for tests and offline development
///
/// Replies are queued up front and consumed FIFO; `generate` and `stream`
/// draw from separate queues.
#[derive(Default)]
pub struct ScriptedClient {
    generations: Mutex<VecDeque<Result<String, LlmError>>>,
    streams: Mutex<VecDeque<Vec<String>>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_generation(&self, text: impl Into<String>) {
        self.generations.lock().push_back(Ok(text.into()));
    }

    pub fn push_generation_error(&self, error: LlmError) {
        self.generations.lock().push_back(Err(error));
    }

    pub fn push_stream<S: Into<String>>(&self, chunks: impl IntoIterator<Item = S>) {
        self.streams.lock().push_back(chunks.into_iter().map(Into::into).collect());
    }

    /// Number of scripted generations not yet consumed
    pub fn remaining_generations(&self) -> usize {
        self.generations.lock().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn generate(
        &self,
        _messages: &[Message],
        _params: &GenerationParams,
    ) -> Result<String, LlmError> {
        self.generations
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Unavailable("scripted client exhausted".to_string())))
    }

    async fn stream(
        &self,
        _messages: &[Message],
        _params: &GenerationParams,
    ) -> Result<mpsc::Receiver<String>, LlmError> {
        let chunks = self
            .streams
            .lock()
            .pop_front()
            .ok_or_else(|| LlmError::Unavailable("scripted client exhausted".to_string()))?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}
