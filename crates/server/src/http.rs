//! HTTP endpoints
//!
//! The streaming chat endpoint emits Server-Sent Events; every event is one
//! `data: <JSON>\n\n` frame. Health and memory inspection routes are plain
//! JSON.

use axum::{
    body::Body,
    extract::{Json, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use chat_agent_core::ChatRequest;

use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/chat/stream", post(chat_stream))
        .route("/api/v1/memory/health", get(memory_health))
        .route("/api/v1/memory/profile/:user_id", get(memory_profile))
        .route("/api/v1/memory/search", post(memory_search))
        .route("/api/v1/memory/:user_id", axum::routing::delete(memory_clear))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Streaming chat endpoint
async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    if request.message.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": "消息不能为空"})))
            .into_response();
    }
    if request.conversation_id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": "缺少会话ID"})))
            .into_response();
    }

    let stream = state
        .orchestrator
        .clone()
        .process_stream(request)
        .map(|event| Ok::<_, std::convert::Infallible>(event.to_sse()));

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Service health
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let kv_ok = state.kv.ping().await;
    let vector_ok = state.vector.health().await;
    let (queued, active) = state.pool.depth();

    let healthy = kv_ok && vector_ok;
    let status_code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status_code,
        Json(serde_json::json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "checks": {
                "kv_store": if kv_ok { "ok" } else { "error" },
                "vector_store": if vector_ok { "ok" } else { "error" },
                "compression_pool": { "queued": queued, "active": active },
            }
        })),
    )
}

/// Memory subsystem health
async fn memory_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let kv_ok = state.kv.ping().await;
    let vector_ok = state.vector.health().await;
    let (queued, active) = state.pool.depth();

    Json(serde_json::json!({
        "status": if kv_ok && vector_ok { "ok" } else { "degraded" },
        "short_term": {
            "enabled": state.settings.memory.short_term_enabled,
            "kv_store": if kv_ok { "ok" } else { "error" },
        },
        "long_term": {
            "enabled": state.settings.memory.long_term_enabled,
            "vector_store": if vector_ok { "ok" } else { "error" },
            "min_importance_score": state.settings.memory.min_importance_score,
        },
        "compression": {
            "queued": queued,
            "active": active,
            "max_concurrent": state.settings.memory.compression_max_concurrent,
        }
    }))
}

/// Stored profile for one user, plus its rendered prompt preamble
async fn memory_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<serde_json::Value> {
    let profile = state.memory.profile_service().profile(&user_id).await;
    let contextual_prompt = state.memory.profile_service().build_contextual_prompt(&user_id).await;
    Json(serde_json::json!({
        "user_id": user_id,
        "profile": profile,
        "contextual_prompt": contextual_prompt,
    }))
}

/// Clear every stored key for one user: profile, turn logs, summaries
///
/// Maintenance-only path; the pattern scan never runs on the request path.
async fn memory_clear(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<serde_json::Value> {
    let mut deleted = 0usize;

    let patterns = [
        format!("conversation:{user_id}:*"),
        format!("conversation_summary:{user_id}:*"),
    ];
    for pattern in &patterns {
        if let Ok(keys) = state.kv.keys(pattern).await {
            for key in keys {
                if state.kv.del(&key).await.is_ok() {
                    deleted += 1;
                }
            }
        }
    }
    if state.kv.del(&format!("profile:{user_id}")).await.is_ok() {
        deleted += 1;
    }

    tracing::info!(%user_id, deleted, "cleared user memory");
    Json(serde_json::json!({
        "user_id": user_id,
        "deleted_keys": deleted,
    }))
}

#[derive(Debug, Deserialize)]
struct MemorySearchRequest {
    #[serde(default = "default_search_user")]
    user_id: String,
    query: String,
    #[serde(default = "default_search_limit")]
    limit: usize,
}

fn default_search_user() -> String {
    "default_user".to_string()
}

fn default_search_limit() -> usize {
    5
}

/// Semantic memory search
async fn memory_search(
    State(state): State<AppState>,
    Json(request): Json<MemorySearchRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if request.query.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let memories = state
        .memory
        .long_term()
        .search_relevant(&request.user_id, &request.query, request.limit, 0.0, None)
        .await;

    let results: Vec<serde_json::Value> = memories
        .iter()
        .map(|m| {
            serde_json::json!({
                "id": m.id,
                "content": m.content,
                "similarity": m.similarity,
                "importance_score": m.importance_score,
                "intent": m.intent,
                "created_at": m.created_at.to_rfc3339(),
                "rank_score": m.rank_score,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "query": request.query,
        "count": results.len(),
        "results": results,
    })))
}
