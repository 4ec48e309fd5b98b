//! Chat orchestration
//!
//! Drives one request: memory context → intent classification → streamed
//! generation → persistence → asynchronous memory update. The code intent
//! runs in two phases: the model first produces Python that is executed in
//! the sandbox (never streamed to the user), then a second streamed call
//! answers from the execution output.
//!
//! Event ordering guarantees: `message_created` always precedes `end`;
//! failures before streaming collapse into a single `error` event; the
//! post-turn memory update only starts after the client has consumed `end`.

use std::sync::Arc;

use futures::Stream;

use chat_agent_core::{ChatRequest, CodeSandbox, Intent, MessageRole, MessageStore, SandboxOutcome};
use chat_agent_llm::{
    build_messages, extract_python_block, system_prompt, GenerationParams, LlmClient, LlmError,
    PromptInputs,
};
use chat_agent_memory::UnifiedMemory;

use crate::events::ChatEvent;
use crate::intent::{IntentClassifier, IntentResult};

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Turns/memories requested from each memory tier
    pub context_limit: usize,
    /// Base URL prepended to relative artifact URLs in persisted responses
    pub public_base_url: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { context_limit: 3, public_base_url: "http://localhost:3001".to_string() }
    }
}

/// Chat orchestrator
pub struct ChatOrchestrator {
    llm: Arc<dyn LlmClient>,
    classifier: IntentClassifier,
    memory: Arc<UnifiedMemory>,
    store: Arc<dyn MessageStore>,
    sandbox: Arc<dyn CodeSandbox>,
    params: GenerationParams,
    config: OrchestratorConfig,
}

impl ChatOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        classifier: IntentClassifier,
        memory: Arc<UnifiedMemory>,
        store: Arc<dyn MessageStore>,
        sandbox: Arc<dyn CodeSandbox>,
        params: GenerationParams,
        config: OrchestratorConfig,
    ) -> Self {
        Self { llm, classifier, memory, store, sandbox, params, config }
    }

    /// Process one request into a stream of chat events
    pub fn process_stream(
        self: Arc<Self>,
        request: ChatRequest,
    ) -> impl Stream<Item = ChatEvent> + Send + 'static {
        let this = self;

        async_stream::stream! {
            let ChatRequest { user_id, conversation_id, message, attachments } = request;
            tracing::info!(%user_id, %conversation_id, preview = %preview(&message), "chat request");

            // Memory context first: the classifier also uses the recent turns
            let context = this
                .memory
                .get_conversation_context(
                    &user_id,
                    &conversation_id,
                    &message,
                    this.config.context_limit,
                )
                .await;

            let intent_result =
                this.classifier.classify(&message, &attachments, &context.conversations).await;
            let intent = intent_result.intent;
            tracing::info!(%user_id, %intent, reasoning = %intent_result.reasoning, "intent classified");

            let sources = intent_result
                .search_results
                .as_ref()
                .map(|r| r.source_urls())
                .unwrap_or_default();
            let inputs = prompt_inputs(&intent_result, context.full_context.clone());

            let mut full_response = String::new();
            let mut artifacts = Vec::new();

            if intent == Intent::Code {
                // Phase 1: generate and execute, nothing streamed yet
                let outcome = match this.run_code_phase(&message, &inputs, &user_id).await {
                    Ok(outcome) => outcome,
                    Err(event) => {
                        yield event;
                        return;
                    },
                };

                // Phase 2: answer from the execution result
                let answer_prompt = execution_answer_prompt(&message, &outcome);
                let answer_inputs = PromptInputs {
                    full_context: context.full_context.clone(),
                    ..PromptInputs::default()
                };
                let system = system_prompt(Intent::Normal, &answer_inputs);
                let messages = build_messages(&system, &answer_prompt);

                match this.llm.stream(&messages, &this.params).await {
                    Ok(mut rx) => {
                        while let Some(chunk) = rx.recv().await {
                            full_response.push_str(&chunk);
                            yield ChatEvent::content(chunk);
                        }
                    },
                    Err(e) => {
                        yield ChatEvent::error(user_facing_error(&e));
                        return;
                    },
                }

                for image in &outcome.images {
                    yield ChatEvent::image(image);
                    let url = if image.url.starts_with("http") {
                        image.url.clone()
                    } else {
                        format!("{}{}", this.config.public_base_url, image.url)
                    };
                    full_response.push_str(&format!("\n\n![{}]({url})", image.filename));
                }
                artifacts = outcome.images;
            } else {
                let system = system_prompt(intent, &inputs);
                let messages = build_messages(&system, &message);

                match this.llm.stream(&messages, &this.params).await {
                    Ok(mut rx) => {
                        while let Some(chunk) = rx.recv().await {
                            full_response.push_str(&chunk);
                            yield ChatEvent::content(chunk);
                        }
                    },
                    Err(e) => {
                        yield ChatEvent::error(user_facing_error(&e));
                        return;
                    },
                }
            }

            tracing::debug!(
                %user_id,
                chars = full_response.chars().count(),
                images = artifacts.len(),
                "response streamed"
            );

            yield this
                .persist(&conversation_id, &message, &full_response, intent, &sources)
                .await;
            yield ChatEvent::End;

            // Post-turn memory update, after the stream has been consumed
            let memory = this.memory.clone();
            let intent_name = intent.as_str().to_string();
            tokio::spawn(async move {
                memory
                    .process_conversation(
                        &user_id,
                        &conversation_id,
                        &message,
                        &full_response,
                        &intent_name,
                        &sources,
                    )
                    .await;
            });
        }
    }

    /// Code-intent phase 1: generate Python and run it in the sandbox
    ///
    /// Raw code is never streamed; every failure becomes a single terminal
    /// `error` event.
    async fn run_code_phase(
        &self,
        message: &str,
        inputs: &PromptInputs,
        user_id: &str,
    ) -> Result<SandboxOutcome, ChatEvent> {
        let system = system_prompt(Intent::Code, inputs);
        let messages = build_messages(&system, message);

        let code_response = self
            .llm
            .generate(&messages, &self.params)
            .await
            .map_err(|e| ChatEvent::error(user_facing_error(&e)))?;

        let code = extract_python_block(&code_response)
            .ok_or_else(|| ChatEvent::error("无法生成分析代码，请换一种方式描述需求"))?;
        tracing::info!(user_id, code_chars = code.chars().count(), "executing generated code");

        let outcome = self
            .sandbox
            .execute(&code, user_id)
            .await
            .map_err(|e| ChatEvent::error(format!("代码执行失败：{e}")))?;

        if !outcome.success {
            let detail = outcome.error.unwrap_or_else(|| "未知错误".to_string());
            return Err(ChatEvent::error(format!("代码执行失败：{detail}")));
        }

        tracing::info!(
            user_id,
            output_chars = outcome.output.chars().count(),
            images = outcome.images.len(),
            "code execution succeeded"
        );
        Ok(outcome)
    }

    /// Persist both messages; emits `message_created` or
    /// `message_creation_error`
    async fn persist(
        &self,
        conversation_id: &str,
        message: &str,
        response: &str,
        intent: Intent,
        sources: &[String],
    ) -> ChatEvent {
        let user_message = self
            .store
            .create_message(conversation_id, MessageRole::User, message, None, &[])
            .await;
        let ai_message = self
            .store
            .create_message(
                conversation_id,
                MessageRole::Assistant,
                response,
                Some(intent.as_str()),
                sources,
            )
            .await;

        match (user_message, ai_message) {
            (Ok(user_message_id), Ok(ai_message_id)) => ChatEvent::MessageCreated {
                user_message_id,
                ai_message_id,
                conversation_id: conversation_id.to_string(),
                intent: intent.as_str().to_string(),
                sources: sources.to_vec(),
            },
            (user, ai) => {
                let error = user.err().or(ai.err()).map(|e| e.to_string()).unwrap_or_default();
                tracing::error!(conversation_id, error, "message persistence failed");
                ChatEvent::MessageCreationError { error: format!("创建消息失败: {error}") }
            },
        }
    }
}

fn prompt_inputs(result: &IntentResult, full_context: String) -> PromptInputs {
    let mut inputs = PromptInputs { full_context, ..PromptInputs::default() };
    match result.intent {
        Intent::File => inputs.file_content = result.content.clone(),
        Intent::Web => inputs.web_content = result.content.clone(),
        Intent::Search => inputs.search_results = result.search_results.clone(),
        _ => {},
    }
    inputs
}

/// Build the phase-2 prompt embedding the execution output
fn execution_answer_prompt(message: &str, outcome: &SandboxOutcome) -> String {
    let mut prompt = format!("用户问题：{message}\n\n代码执行结果：\n");
    if !outcome.output.is_empty() {
        prompt.push_str(&format!("- 输出数据：\n{}\n", outcome.output));
    }
    if !outcome.images.is_empty() {
        prompt.push_str(&format!("- 生成了 {} 张图表\n", outcome.images.len()));
    }
    prompt.push_str(
        "\n请基于以上执行结果，直接回答用户的问题。\n\
         要求：\n\
         1. 用自然语言回答，不要显示代码\n\
         2. 如果有数据输出，解释数据的含义\n\
         3. 如果生成了图表，简要说明图表展示的内容\n\
         4. 回答要简洁、专业、准确",
    );
    prompt
}

/// Map an upstream failure to a user-facing message
fn user_facing_error(error: &LlmError) -> String {
    match error {
        LlmError::ContentRejected => "内容审核未通过，请尝试使用不同的表达方式".to_string(),
        LlmError::Timeout => "大语言模型API调用超时，请稍后重试".to_string(),
        LlmError::AuthFailed => "API认证失败，请检查API密钥".to_string(),
        LlmError::RateLimited => "API请求过于频繁，请稍后重试".to_string(),
        other => format!("处理请求时发生错误: {other}"),
    }
}

fn preview(message: &str) -> String {
    let short: String = message.chars().take(50).collect();
    if short.chars().count() < message.chars().count() {
        format!("{short}...")
    } else {
        short
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_agent_core::SandboxImage;

    #[test]
    fn test_execution_answer_prompt_mentions_output_and_images() {
        let outcome = SandboxOutcome {
            success: true,
            output: "mean=3.2".to_string(),
            error: None,
            images: vec![SandboxImage { url: "/img/a.png".into(), filename: "a.png".into() }],
        };
        let prompt = execution_answer_prompt("画个图", &outcome);

        assert!(prompt.contains("用户问题：画个图"));
        assert!(prompt.contains("mean=3.2"));
        assert!(prompt.contains("生成了 1 张图表"));
        assert!(prompt.contains("不要显示代码"));
    }

    #[test]
    fn test_execution_answer_prompt_without_output() {
        let outcome = SandboxOutcome {
            success: true,
            output: String::new(),
            error: None,
            images: vec![],
        };
        let prompt = execution_answer_prompt("算一下", &outcome);
        assert!(!prompt.contains("输出数据"));
        assert!(!prompt.contains("图表"));
    }

    #[test]
    fn test_user_facing_errors() {
        assert!(user_facing_error(&LlmError::ContentRejected).contains("内容审核"));
        assert!(user_facing_error(&LlmError::Timeout).contains("超时"));
        assert!(user_facing_error(&LlmError::RateLimited).contains("频繁"));
    }

    #[test]
    fn test_preview_truncates() {
        let long = "字".repeat(80);
        assert!(preview(&long).ends_with("..."));
        assert_eq!(preview("短消息"), "短消息");
    }
}
