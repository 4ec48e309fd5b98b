//! Application state
//!
//! Builds the subsystem graph: KV store, vector store, LLM and embedding
//! clients, the memory tiers, the compression pool, and the orchestrator.
//! External stores degrade to in-memory fallbacks when unreachable so the
//! service still comes up with reduced durability.

use std::sync::Arc;

use chat_agent_config::Settings;
use chat_agent_core::{CodeSandbox, DisabledSandbox, InMemoryMessageStore, MessageStore};
use chat_agent_llm::{
    DashScopeEmbedder, Embedder, GenerationParams, HashEmbedder, LlmClient, QwenClient,
};
use chat_agent_memory::{
    CompressionPool, CompressionPoolConfig, InMemoryStore, InMemoryVectorStore, KvStore,
    LongTermConfig, LongTermMemory, ProfileService, QdrantStore, RedisStore, ShortTermConfig,
    ShortTermMemory, SummaryGenerator, UnifiedMemory, UnifiedMemoryConfig, VectorStore,
};
use chat_agent_pipeline::{
    ChatOrchestrator, HttpPageFetcher, IntentClassifier, OrchestratorConfig, PageFetcherConfig,
    TavilySearcher,
};

use crate::ServerError;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub orchestrator: Arc<ChatOrchestrator>,
    pub memory: Arc<UnifiedMemory>,
    pub pool: Arc<CompressionPool>,
    pub kv: Arc<dyn KvStore>,
    pub vector: Arc<dyn VectorStore>,
}

impl AppState {
    /// Wire the full subsystem graph from settings
    pub async fn build(settings: Settings) -> Result<Self, ServerError> {
        let llm: Arc<dyn LlmClient> = Arc::new(
            QwenClient::new(settings.llm.clone()).map_err(|e| ServerError::Init(e.to_string()))?,
        );

        let embedder: Arc<dyn Embedder> = match DashScopeEmbedder::new(
            settings.embedding.clone(),
            settings.llm.api_key.clone(),
        ) {
            Ok(embedder) => Arc::new(embedder),
            Err(e) => {
                tracing::warn!(error = %e, "embedding client unavailable, using hash embedder");
                Arc::new(HashEmbedder::new(settings.embedding.dim))
            },
        };

        let kv_url = settings.kv.url();
        let connect = tokio::time::timeout(
            std::time::Duration::from_secs(3),
            RedisStore::connect(&kv_url),
        );
        let kv: Arc<dyn KvStore> = match connect.await {
            Ok(Ok(store)) => Arc::new(store),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Redis unreachable, falling back to in-memory KV");
                Arc::new(InMemoryStore::new())
            },
            Err(_) => {
                tracing::warn!("Redis connection timed out, falling back to in-memory KV");
                Arc::new(InMemoryStore::new())
            },
        };

        let vector: Arc<dyn VectorStore> = match Self::init_vector(&settings).await {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(error = %e, "Qdrant unreachable, falling back to in-memory vectors");
                let fallback = InMemoryVectorStore::new();
                let _ = fallback.ensure_collection(&settings.vector.collection, settings.vector.dim).await;
                Arc::new(fallback)
            },
        };

        let store: Arc<dyn MessageStore> = Arc::new(InMemoryMessageStore::new());
        let sandbox: Arc<dyn CodeSandbox> = Arc::new(DisabledSandbox);

        let summaries = Arc::new(SummaryGenerator::new(llm.clone()));
        let pool = Arc::new(CompressionPool::new(
            CompressionPoolConfig {
                max_concurrent: settings.memory.compression_max_concurrent,
                queue_cap: settings.memory.compression_queue_size,
                summary_ttl_seconds: settings.memory.summary_ttl_seconds,
                conversation_ttl_seconds: settings.memory.conversation_ttl_seconds,
                ..CompressionPoolConfig::default()
            },
            kv.clone(),
            store.clone(),
            summaries,
        ));
        pool.clone().spawn();

        let short_term = Arc::new(ShortTermMemory::new(
            kv.clone(),
            store.clone(),
            pool.clone(),
            ShortTermConfig::from(&settings.memory),
        ));
        let profile = Arc::new(ProfileService::new(
            kv.clone(),
            llm.clone(),
            settings.memory.profile_ttl_seconds,
        ));
        let long_term = Arc::new(LongTermMemory::new(
            vector.clone(),
            embedder,
            LongTermConfig {
                enabled: settings.memory.long_term_enabled,
                min_importance_score: settings.memory.min_importance_score,
                collection: settings.vector.collection.clone(),
                ..LongTermConfig::default()
            },
        ));
        let memory = Arc::new(UnifiedMemory::new(
            short_term,
            long_term,
            profile,
            UnifiedMemoryConfig::from(&settings.memory),
        ));

        let fetcher = HttpPageFetcher::new(PageFetcherConfig::from(&settings.fetch))
            .map_err(|e| ServerError::Init(e.to_string()))?;
        let searcher = TavilySearcher::new(settings.search.clone())
            .map_err(|e| ServerError::Init(e.to_string()))?;
        let classifier = IntentClassifier::new(llm.clone(), Arc::new(fetcher), Arc::new(searcher));

        let orchestrator = Arc::new(ChatOrchestrator::new(
            llm,
            classifier,
            memory.clone(),
            store,
            sandbox,
            GenerationParams::from_settings(&settings.llm),
            OrchestratorConfig {
                context_limit: 3,
                public_base_url: settings.server.public_base_url.clone(),
            },
        ));

        Ok(Self {
            settings: Arc::new(settings),
            orchestrator,
            memory,
            pool,
            kv,
            vector,
        })
    }

    async fn init_vector(settings: &Settings) -> Result<Arc<dyn VectorStore>, ServerError> {
        let store = QdrantStore::connect(
            &settings.vector.endpoint,
            settings.vector.api_key.as_deref(),
        )
        .map_err(|e| ServerError::Init(e.to_string()))?;

        store
            .ensure_collection(&settings.vector.collection, settings.vector.dim)
            .await
            .map_err(|e| ServerError::Init(e.to_string()))?;

        Ok(Arc::new(store))
    }
}
