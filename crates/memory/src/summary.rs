//! Summary generation
//!
//! Builds the layered conversation summaries. Each level covers a window of
//! the most recent turns (L1: 2, L2: 5, L3: 10) and may be conditioned on
//! the summary of the level above it. Output is bounded: ~150 chars target,
//! hard-truncated at 500.

use std::sync::Arc;

use chat_agent_core::Turn;
use chat_agent_llm::{GenerationParams, LlmClient};

/// Hard ceiling on a stored summary, in characters
const MAX_SUMMARY_CHARS: usize = 500;

/// Summary layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SummaryLevel {
    L1,
    L2,
    L3,
}

impl SummaryLevel {
    /// All levels, largest window first (generation order)
    pub const DESCENDING: [SummaryLevel; 3] = [SummaryLevel::L3, SummaryLevel::L2, SummaryLevel::L1];

    /// Read/render order for context assembly
    pub const RENDER_ORDER: [SummaryLevel; 3] = Self::DESCENDING;

    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryLevel::L1 => "L1",
            SummaryLevel::L2 => "L2",
            SummaryLevel::L3 => "L3",
        }
    }

    /// Most-recent-turns window covered by this level
    pub fn cap(&self) -> usize {
        match self {
            SummaryLevel::L1 => 2,
            SummaryLevel::L2 => 5,
            SummaryLevel::L3 => 10,
        }
    }

    /// Minimum turns required before the level is generated
    pub fn min_turns(&self) -> usize {
        self.cap().saturating_sub(2)
    }

    fn description(&self) -> &'static str {
        match self {
            SummaryLevel::L1 => "单轮对话摘要",
            SummaryLevel::L2 => "多轮对话摘要",
            SummaryLevel::L3 => "主题聚类摘要",
        }
    }
}

/// LLM-backed summary generator
pub struct SummaryGenerator {
    llm: Arc<dyn LlmClient>,
}

impl SummaryGenerator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Generate one layer summary; empty string on any failure
    pub async fn generate_layer(
        &self,
        level: SummaryLevel,
        turns: &[Turn],
        prior_summary: &str,
    ) -> String {
        let window_start = turns.len().saturating_sub(level.cap());
        let window = &turns[window_start..];
        let context = format_turns(window);
        if context.is_empty() {
            return String::new();
        }

        let previous_context = if prior_summary.is_empty() {
            String::new()
        } else {
            format!("\n\n上一层摘要：\n{prior_summary}\n")
        };

        let prompt = format!(
            "请为以下对话生成{description}（{level}层）。\n\
             要求：\n\
             1. 简洁清晰，不超过150字\n\
             2. 保留关键信息和讨论要点\n\
             3. 如果有上一层摘要，基于其基础上进行补充和总结\n\
             {previous_context}\n\
             最近对话内容：\n\
             {context}\n\n\
             请生成{level}层摘要：",
            description = level.description(),
            level = level.as_str(),
        );

        self.run(prompt, level.as_str()).await
    }

    /// Unleveled summary (≤100 chars), kept for legacy callers
    pub async fn generate_flat(&self, turns: &[Turn]) -> String {
        let context = format_turns(turns);
        if context.is_empty() {
            return String::new();
        }

        let prompt = format!(
            "请将以下对话内容总结成简洁的摘要（不超过100字）。\n\
             注意：\n\
             1. 保留关键信息和主要讨论点\n\
             2. 使用简洁的语言\n\
             3. 突出重要的事实和结论\n\n\
             对话内容：\n\
             {context}\n\n\
             请生成摘要："
        );

        self.run(prompt, "flat").await
    }

    async fn run(&self, prompt: String, label: &str) -> String {
        let messages = chat_agent_llm::build_messages(
            "你是一个专业的对话摘要助手。请用中文输出简洁准确的摘要。",
            &prompt,
        );

        match self.llm.generate(&messages, &GenerationParams::deterministic()).await {
            Ok(summary) => {
                let summary = truncate_chars(summary.trim(), MAX_SUMMARY_CHARS);
                tracing::debug!(layer = label, chars = summary.chars().count(), "summary generated");
                summary
            },
            Err(e) => {
                tracing::warn!(layer = label, error = %e, "summary generation failed");
                String::new()
            },
        }
    }
}

fn format_turns(turns: &[Turn]) -> String {
    let mut parts = Vec::with_capacity(turns.len() * 2);
    for turn in turns {
        if turn.message.is_empty() || turn.response.is_empty() {
            continue;
        }
        parts.push(format!("用户: {}", turn.message));
        parts.push(format!("助手: {}", turn.response));
    }
    parts.join("\n")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}
