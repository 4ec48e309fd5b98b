//! Intent classification
//!
//! Deterministic checks first (URL attachments, file attachments, URLs in
//! the message text), then LLM arbitration over `{search, code, normal}`
//! with the recent turns as context. Every failure path demotes to `normal`
//! rather than erroring; the reported confidence is advisory.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use chat_agent_core::{
    Attachment, AttachmentKind, FetchError, Intent, PageFetcher, SearchResults, Turn, WebSearcher,
};
use chat_agent_llm::{build_messages, extract_json_object, GenerationParams, LlmClient};

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s]+").expect("valid regex"));

/// Classification result
#[derive(Debug, Clone)]
pub struct IntentResult {
    pub intent: Intent,
    /// Extracted file or web content for prompt assembly
    pub content: Option<String>,
    pub search_results: Option<SearchResults>,
    pub confidence: f32,
    pub reasoning: String,
}

impl IntentResult {
    fn new(intent: Intent, confidence: f32, reasoning: impl Into<String>) -> Self {
        Self {
            intent,
            content: None,
            search_results: None,
            confidence,
            reasoning: reasoning.into(),
        }
    }

    fn with_content(mut self, content: String) -> Self {
        self.content = Some(content);
        self
    }
}

/// Intent classifier
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    fetcher: Arc<dyn PageFetcher>,
    searcher: Arc<dyn WebSearcher>,
}

impl IntentClassifier {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        fetcher: Arc<dyn PageFetcher>,
        searcher: Arc<dyn WebSearcher>,
    ) -> Self {
        Self { llm, fetcher, searcher }
    }

    /// Classify one message; first match wins
    pub async fn classify(
        &self,
        message: &str,
        attachments: &[Attachment],
        recent_turns: &[Turn],
    ) -> IntentResult {
        // 1. URL attachments
        let url_attachments: Vec<&Attachment> =
            attachments.iter().filter(|a| a.kind == AttachmentKind::Url).collect();
        if !url_attachments.is_empty() {
            let content = url_attachments
                .iter()
                .filter(|a| !a.content.is_empty())
                .map(|a| format!("\n\n{}", a.content))
                .collect::<String>();
            tracing::info!("URL attachments present, using web intent");
            return IntentResult::new(Intent::Web, 1.0, "检测到URL附件").with_content(content);
        }

        // 2. File attachments
        let file_attachments: Vec<&Attachment> =
            attachments.iter().filter(|a| a.kind == AttachmentKind::File).collect();
        if !file_attachments.is_empty() {
            let content = file_attachments
                .iter()
                .map(|a| {
                    format!(
                        "\n\n文件 {}:\n{}",
                        a.filename.as_deref().unwrap_or("unknown"),
                        a.content
                    )
                })
                .collect::<String>();
            tracing::info!("file attachments present, using file intent");
            return IntentResult::new(Intent::File, 1.0, "检测到文件附件").with_content(content);
        }

        // 3. URL in the message text
        if let Some(url) = URL_RE.find(message).map(|m| m.as_str().to_string()) {
            return self.classify_url(message, &url).await;
        }

        // 4. LLM arbitration over search / code / normal
        let (intent, reasoning, confidence) = self.arbitrate(message, recent_turns).await;

        // 5. Search intent resolves its results synchronously
        if intent == Intent::Search {
            match self.searcher.search(message).await {
                Ok(results) => {
                    let mut result = IntentResult::new(Intent::Search, confidence, reasoning);
                    result.search_results = Some(results);
                    return result;
                },
                Err(e) => {
                    tracing::warn!(error = %e, "search failed, demoting to normal");
                    return IntentResult::new(
                        Intent::Normal,
                        1.0,
                        format!("搜索失败，使用普通对话: {e}"),
                    );
                },
            }
        }

        IntentResult::new(intent, confidence, reasoning)
    }

    async fn classify_url(&self, message: &str, url: &str) -> IntentResult {
        tracing::info!(url, "URL detected in message");
        match self.fetcher.fetch(url).await {
            Ok(page) => {
                let content = format!("标题：{}\n\n内容：{}", page.title, page.content);
                IntentResult::new(Intent::Web, 1.0, format!("检测到URL: {url}"))
                    .with_content(content)
            },
            Err(FetchError::AntiScrape { title }) => {
                // Stay on the web intent; the model explains the failure
                let content = format!(
                    "错误：无法访问网页内容，可能遇到反爬虫保护。标题：{title}，\
                     请尝试其他URL或手动复制内容。\n\n原始问题：{message}"
                );
                IntentResult::new(Intent::Web, 0.8, format!("URL分析遇到反爬虫保护: {url}"))
                    .with_content(content)
            },
            Err(e) => {
                let content = format!("无法访问网页 {url}，错误：{e}\n\n{message}");
                IntentResult::new(Intent::Normal, 0.7, format!("URL分析失败: {e}"))
                    .with_content(content)
            },
        }
    }

    /// LLM arbitration; returns `(intent, reasoning, confidence)`
    async fn arbitrate(&self, message: &str, recent_turns: &[Turn]) -> (Intent, String, f32) {
        let mut history = String::new();
        let start = recent_turns.len().saturating_sub(3);
        if start < recent_turns.len() {
            history.push_str("\n最近的对话历史：\n");
            for turn in &recent_turns[start..] {
                history.push_str(&format!("用户: {}\n助手: {}\n\n", turn.message, turn.response));
            }
        }

        let prompt = format!(
            "你是一个智能意图识别助手。请分析用户的消息和对话历史，判断用户的意图。\n\
             {history}\n\
             当前用户消息: {message}\n\n\
             请从以下意图中选择最合适的一个：\n\
             1. search - 用户需要搜索网络上的最新信息、实时数据、新闻、特定知识等\n\
             2. code - 用户需要执行Python代码进行数据分析、计算、报表生成、画图、可视化、绘图等\n\
             3. normal - 普通对话，不需要特殊工具\n\n\
             分析要点：\n\
             - 天气、股票、汇率、新闻等实时信息查询应归类为 search\n\
             - 画图、绘图、可视化、生成图表、绘制函数图等需求应归类为 code\n\
             - 学习编程、询问概念、寻求解释、教学指导等属于 normal\n\
             - 考虑对话历史的上下文，判断用户的真实需求\n\n\
             请以JSON格式回答：\n\
             {{\n\
                 \"intent\": \"search|code|normal\",\n\
                 \"reasoning\": \"详细说明为什么选择这个意图\",\n\
                 \"confidence\": 0.0-1.0\n\
             }}"
        );

        let messages = build_messages("你是一个意图识别助手，只输出JSON。", &prompt);
        let response = match self.llm.generate(&messages, &GenerationParams::default()).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "intent arbitration failed, defaulting to normal");
                return (Intent::Normal, format!("LLM分析失败，使用普通对话: {e}"), 0.5);
            },
        };

        if let Some(json) = extract_json_object(&response) {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(json) {
                let intent = value
                    .get("intent")
                    .and_then(|i| i.as_str())
                    .and_then(|i| i.parse::<Intent>().ok())
                    .unwrap_or(Intent::Normal);
                let reasoning = value
                    .get("reasoning")
                    .and_then(|r| r.as_str())
                    .unwrap_or("")
                    .to_string();
                let confidence =
                    value.get("confidence").and_then(|c| c.as_f64()).unwrap_or(0.8) as f32;
                return (intent, reasoning, confidence);
            }
        }

        // Unparseable reply: fall back to token matching
        let lowered = response.to_lowercase();
        if lowered.contains("search") {
            (Intent::Search, "LLM判断需要搜索".to_string(), 0.7)
        } else if lowered.contains("code") {
            (Intent::Code, "LLM判断需要代码执行".to_string(), 0.7)
        } else {
            (Intent::Normal, "LLM判断普通对话".to_string(), 0.7)
        }
    }
}
