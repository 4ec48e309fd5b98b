//! End-to-end chat pipeline scenarios over scripted doubles
//!
//! Exercises the full orchestrator wiring: intent classification, context
//! assembly, streaming, persistence, and the asynchronous memory update.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use chat_agent_core::{
    ChatRequest, CodeSandbox, FetchError, InMemoryMessageStore, MessageRole, MessageStore,
    PageContent, PageFetcher, SandboxImage, SandboxOutcome, SearchResults, Turn, WebSearcher,
};
use chat_agent_llm::{Embedder, GenerationParams, HashEmbedder, ScriptedClient};
use chat_agent_memory::{
    keys, CompressionPool, CompressionPoolConfig, InMemoryStore, InMemoryVectorStore, KvStore,
    LongTermConfig, LongTermMemory, MemoryRecord, ProfileService, ShortTermConfig,
    ShortTermMemory, SummaryGenerator, UnifiedMemory, UnifiedMemoryConfig, VectorStore,
};
use chat_agent_pipeline::{ChatEvent, ChatOrchestrator, IntentClassifier, OrchestratorConfig};

/// Page fetcher double: always anti-scrape, or a fixed page
struct StubFetcher {
    anti_scrape: bool,
}

#[async_trait]
impl PageFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<PageContent, FetchError> {
        if self.anti_scrape {
            Err(FetchError::AntiScrape { title: "安全验证".to_string() })
        } else {
            Ok(PageContent {
                url: url.to_string(),
                title: "页面标题".to_string(),
                content: "页面正文".to_string(),
            })
        }
    }
}

/// Search double that never finds anything useful
struct StubSearcher;

#[async_trait]
impl WebSearcher for StubSearcher {
    async fn search(&self, query: &str) -> chat_agent_core::Result<SearchResults> {
        Ok(SearchResults { query: query.to_string(), answer: None, results: Vec::new() })
    }
}

/// Sandbox double returning a scripted outcome
struct StubSandbox {
    outcome: SandboxOutcome,
}

#[async_trait]
impl CodeSandbox for StubSandbox {
    async fn execute(&self, code: &str, _user_id: &str) -> chat_agent_core::Result<SandboxOutcome> {
        assert!(code.contains("import"), "sandbox received non-code input: {code}");
        Ok(self.outcome.clone())
    }
}

struct Harness {
    orchestrator: Arc<ChatOrchestrator>,
    llm: Arc<ScriptedClient>,
    kv: Arc<InMemoryStore>,
    vector: Arc<InMemoryVectorStore>,
    store: Arc<InMemoryMessageStore>,
    pool: Arc<CompressionPool>,
    memory: Arc<UnifiedMemory>,
}

fn harness(anti_scrape: bool, sandbox_outcome: Option<SandboxOutcome>) -> Harness {
    let llm = Arc::new(ScriptedClient::new());
    let kv = Arc::new(InMemoryStore::new());
    let vector = Arc::new(InMemoryVectorStore::new());
    let store = Arc::new(InMemoryMessageStore::new());

    let pool = Arc::new(CompressionPool::new(
        CompressionPoolConfig::default(),
        kv.clone(),
        store.clone(),
        Arc::new(SummaryGenerator::new(llm.clone())),
    ));
    let short_term = Arc::new(ShortTermMemory::new(
        kv.clone(),
        store.clone(),
        pool.clone(),
        ShortTermConfig::default(),
    ));
    let profile = Arc::new(ProfileService::new(kv.clone(), llm.clone(), 86400 * 7));
    let long_term = Arc::new(LongTermMemory::new(
        vector.clone(),
        Arc::new(HashEmbedder::default()),
        LongTermConfig::default(),
    ));
    let memory = Arc::new(UnifiedMemory::new(
        short_term,
        long_term,
        profile,
        UnifiedMemoryConfig::default(),
    ));

    let classifier = IntentClassifier::new(
        llm.clone(),
        Arc::new(StubFetcher { anti_scrape }),
        Arc::new(StubSearcher),
    );
    let sandbox = Arc::new(StubSandbox {
        outcome: sandbox_outcome.unwrap_or(SandboxOutcome {
            success: false,
            output: String::new(),
            error: Some("not scripted".to_string()),
            images: Vec::new(),
        }),
    });

    let orchestrator = Arc::new(ChatOrchestrator::new(
        llm.clone(),
        classifier,
        memory.clone(),
        store.clone(),
        sandbox,
        GenerationParams::default(),
        OrchestratorConfig::default(),
    ));

    Harness { orchestrator, llm, kv, vector, store, pool, memory }
}

async fn run(harness: &Harness, request: ChatRequest) -> Vec<ChatEvent> {
    let stream = harness.orchestrator.clone().process_stream(request);
    let events: Vec<ChatEvent> = Box::pin(stream).collect().await;
    // Let the fire-and-forget memory update finish
    tokio::time::sleep(Duration::from_millis(200)).await;
    events
}

fn request(message: &str) -> ChatRequest {
    ChatRequest {
        user_id: "u1".to_string(),
        conversation_id: "c1".to_string(),
        message: message.to_string(),
        attachments: Vec::new(),
    }
}

fn content_of(events: &[ChatEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::Content { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

fn event_kind(event: &ChatEvent) -> &'static str {
    match event {
        ChatEvent::Content { .. } => "content",
        ChatEvent::Image { .. } => "image",
        ChatEvent::MessageCreated { .. } => "message_created",
        ChatEvent::MessageCreationError { .. } => "message_creation_error",
        ChatEvent::End => "end",
        ChatEvent::Error { .. } => "error",
    }
}

#[tokio::test]
async fn baseline_normal_chat() {
    let h = harness(false, None);
    h.llm
        .push_generation(r#"{"intent": "normal", "reasoning": "问候", "confidence": 0.95}"#);
    h.llm.push_stream(["你好！", "有什么可以帮你的吗？"]);

    let events = run(&h, request("你好")).await;

    let kinds: Vec<&str> = events.iter().map(event_kind).collect();
    assert_eq!(kinds, vec!["content", "content", "message_created", "end"]);

    match &events[2] {
        ChatEvent::MessageCreated { intent, sources, .. } => {
            assert_eq!(intent, "normal");
            assert!(sources.is_empty());
        },
        other => panic!("unexpected event: {other:?}"),
    }

    // Post-hoc: one short-term turn, nothing in long-term, no profile
    assert_eq!(h.kv.list_len("conversation:u1:c1"), 1);
    assert_eq!(h.vector.point_count("semantic_memory"), 0);
    assert_eq!(h.kv.get("profile:u1").await.unwrap(), None);
    // Both messages persisted
    assert_eq!(h.store.message_count("c1"), 2);
}

#[tokio::test]
async fn profile_capture_across_turns() {
    let h = harness(false, None);

    // Turn 1: classify, stream, then async profile extraction
    h.llm
        .push_generation(r#"{"intent": "normal", "reasoning": "自我介绍", "confidence": 0.9}"#);
    h.llm.push_stream(["你好，张三！"]);
    h.llm.push_generation(r#"{"identity": {"name": "张三"}, "confidence": 0.9}"#);
    run(&h, request("我叫张三")).await;

    let first = h.memory.profile_service().profile("u1").await;
    assert_eq!(first.identity.as_ref().unwrap().name.as_deref(), Some("张三"));

    // Turn 2
    h.llm
        .push_generation(r#"{"intent": "normal", "reasoning": "补充信息", "confidence": 0.9}"#);
    h.llm.push_stream(["北京是个好地方！"]);
    h.llm.push_generation(r#"{"identity": {"location": "北京"}, "confidence": 0.85}"#);
    run(&h, request("我住在北京")).await;

    let second = h.memory.profile_service().profile("u1").await;
    let identity = second.identity.as_ref().unwrap();
    assert_eq!(identity.name.as_deref(), Some("张三"));
    assert_eq!(identity.location.as_deref(), Some("北京"));
    assert!(second.last_updated >= first.last_updated);
}

#[tokio::test]
async fn compression_trigger_after_long_conversation() {
    let h = harness(false, None);

    // Seed 12 turns whose token estimate is far beyond the 3000 budget
    for i in 0..12 {
        let message = format!("问题{i}：{}", "讨论内容".repeat(50));
        let response = format!("回答{i}：{}", "详细解释".repeat(50));
        h.store.create_message("c1", MessageRole::User, &message, None, &[]).await.unwrap();
        h.store
            .create_message("c1", MessageRole::Assistant, &response, Some("normal"), &[])
            .await
            .unwrap();
        let turn = Turn::new(message, response);
        h.kv.lpush(&keys::conversation("u1", "c1"), &serde_json::to_string(&turn).unwrap())
            .await
            .unwrap();
    }

    // The 13th write arrives through the orchestrator
    h.llm
        .push_generation(r#"{"intent": "normal", "reasoning": "继续", "confidence": 0.9}"#);
    h.llm.push_stream(["好的。"]);
    run(&h, request("请继续")).await;

    let (queued, _) = h.pool.depth();
    assert_eq!(queued, 1, "expected a queued high-priority compression job");
    assert_eq!(h.pool.peek_priority(), Some(chat_agent_memory::JobPriority::High));

    // Worker runs: 13 turns → keep 10, summarize 3 → L2 then L1
    h.llm.push_generation("讨论了十二轮问题的要点。");
    h.llm.push_generation("最近几轮的具体结论。");
    h.pool.drain_queue().await;

    assert!(h.kv.list_len("conversation:u1:c1") <= 10);
    assert!(h.kv.get("conversation_summary:u1:c1:L2").await.unwrap().is_some());
    assert!(h.kv.get("conversation_summary:u1:c1:L1").await.unwrap().is_some());

    // A later read leads with the layered summaries
    let context = h.memory.get_conversation_context("u1", "c1", "总结一下", 3).await;
    let recent = context.full_context.split("最近对话：").nth(1).is_some();
    assert!(recent);
    assert!(context.full_context.contains("[L2摘要]"));
    let short_block = context
        .full_context
        .split("\n最近对话：\n")
        .nth(1)
        .expect("short-term block present");
    assert!(short_block.starts_with("[L"), "expected layered summary first: {short_block}");
}

#[tokio::test]
async fn url_intent_with_anti_scrape() {
    let h = harness(true, None);
    h.llm.push_stream(["抱歉，该网页启用了反爬虫保护，", "建议使用搜索功能或直接粘贴内容。"]);

    let events = run(&h, request("分析 https://example-antibot.test 的内容")).await;

    let kinds: Vec<&str> = events.iter().map(event_kind).collect();
    assert_eq!(kinds, vec!["content", "content", "message_created", "end"]);

    // The streamed reply is explanatory prose, not page markup
    let reply = content_of(&events);
    assert!(reply.contains("反爬虫"));
    assert!(!reply.contains('<'));

    match &events[2] {
        ChatEvent::MessageCreated { intent, sources, .. } => {
            assert_eq!(intent, "web");
            assert!(sources.is_empty());
        },
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn code_intent_two_phase() {
    let outcome = SandboxOutcome {
        success: true,
        output: String::new(),
        error: None,
        images: vec![SandboxImage { url: "/img/a.png".to_string(), filename: "a.png".to_string() }],
    };
    let h = harness(false, Some(outcome));

    h.llm
        .push_generation(r#"{"intent": "code", "reasoning": "用户要画图", "confidence": 0.95}"#);
    // Phase 1: generated code (never streamed)
    h.llm.push_generation(
        "好的：\n```python\nimport matplotlib.pyplot as plt\nimport numpy as np\n\
         x = np.linspace(0, 2 * np.pi, 200)\nplt.plot(x, np.sin(x))\nsave_plot('a.png')\n```",
    );
    // Phase 2: the natural-language answer
    h.llm.push_stream(["已经为你绘制了正弦曲线，", "图中展示了一个完整周期。"]);

    let events = run(&h, request("画一个正弦曲线")).await;

    let kinds: Vec<&str> = events.iter().map(event_kind).collect();
    assert_eq!(kinds, vec!["content", "content", "image", "message_created", "end"]);

    // The answer is prose, not the generated code
    let reply = content_of(&events);
    assert!(!reply.contains("matplotlib"));
    assert!(reply.contains("正弦"));

    match &events[2] {
        ChatEvent::Image { url, filename } => {
            assert_eq!(url, "/img/a.png");
            assert_eq!(filename, "a.png");
        },
        other => panic!("unexpected event: {other:?}"),
    }

    // The persisted response carries the markdown image reference
    let messages = h.store.messages("c1");
    let ai = messages.iter().find(|m| m.role == MessageRole::Assistant).unwrap();
    assert!(ai.content.contains("![a.png](http://localhost:3001/img/a.png)"));
    assert_eq!(ai.intent.as_deref(), Some("code"));
}

#[tokio::test]
async fn sandbox_failure_is_a_single_error_event() {
    let h = harness(false, None); // sandbox scripted to fail
    h.llm
        .push_generation(r#"{"intent": "code", "reasoning": "画图", "confidence": 0.9}"#);
    h.llm.push_generation("```python\nimport matplotlib\nsave_plot('x.png')\n```");

    let events = run(&h, request("画个图")).await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        ChatEvent::Error { content } => assert!(content.contains("代码执行失败")),
        other => panic!("unexpected event: {other:?}"),
    }
    // Nothing persisted on the error path
    assert_eq!(h.store.message_count("c1"), 0);
}

#[tokio::test]
async fn long_term_recall_is_user_scoped() {
    let h = harness(false, None);

    // Seed one high-importance memory for u1. The hash embedder stands in
    // for semantic closeness: the stored vector is the embedding of the
    // later query text.
    let embedder = HashEmbedder::default();
    let embedding = embedder.embed("推荐饮品").await.unwrap();
    h.vector
        .upsert(
            "semantic_memory",
            uuid::Uuid::new_v4(),
            embedding,
            MemoryRecord::semantic(
                "u1",
                "c0",
                "问题：咖啡偏好\n回答：用户喜欢手冲咖啡",
                0.82,
                "normal",
                Vec::new(),
            ),
        )
        .await
        .unwrap();

    let context = h.memory.get_conversation_context("u1", "c1", "推荐饮品", 3).await;
    assert!(context.full_context.contains("相关历史记忆："));
    assert!(context.full_context.contains("[重要性: 0.82]"));
    assert!(context.full_context.contains("咖啡"));

    // A different user sees nothing
    let other = h.memory.get_conversation_context("stranger", "c1", "推荐饮品", 3).await;
    assert!(!other.full_context.contains("咖啡"));
    assert_eq!(other.metadata.recalled_memories, 0);
}

#[tokio::test]
async fn stream_error_before_generation_yields_single_error_event() {
    let h = harness(false, None);
    h.llm
        .push_generation(r#"{"intent": "normal", "reasoning": "聊天", "confidence": 0.9}"#);
    // No stream scripted: the stream call fails before any chunk

    let events = run(&h, request("你好")).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], ChatEvent::Error { .. }));
}

#[tokio::test]
async fn content_rejection_is_surfaced_with_friendly_message() {
    let h = harness(false, None);
    h.llm
        .push_generation(r#"{"intent": "code", "reasoning": "代码", "confidence": 0.9}"#);
    h.llm.push_generation_error(chat_agent_llm::LlmError::ContentRejected);

    let events = run(&h, request("帮我生成一段分析代码")).await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        ChatEvent::Error { content } => assert!(content.contains("内容审核")),
        other => panic!("unexpected event: {other:?}"),
    }
}
