//! REST API Server for the Financial RAG Orchestrator
//!
//! Exposes chat, health, stats and memory administration over HTTP.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::models::{ChatRequest, ChatResponse, HealthResponse};
use crate::rag::RagOrchestrator;

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<RagOrchestrator>,
}

fn detail(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "detail": message })))
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        knowledge_base_loaded: state.orchestrator.is_ready(),
        document_count: state.orchestrator.document_count(),
    })
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<Value>)> {
    if req.message.trim().is_empty() {
        return Err(detail(StatusCode::UNPROCESSABLE_ENTITY, "message must not be empty"));
    }

    if !state.orchestrator.is_ready() {
        warn!("Chat rejected: knowledge base not loaded");
        return Err(detail(
            StatusCode::SERVICE_UNAVAILABLE,
            "RAG service not initialized",
        ));
    }

    let conversation_id = req.resolved_conversation_id();
    info!(
        conversation_id = %conversation_id,
        user_id = req.user_id,
        wallet_id = req.wallet_id,
        "Received chat request"
    );

    let answer = state
        .orchestrator
        .answer(&req.message, &req.financial_context, &conversation_id)
        .await;

    Ok(Json(ChatResponse {
        response: answer.response,
        sources: answer.sources,
        conversation_id,
    }))
}

/// =============================
/// Stats & Memory Administration
/// =============================

async fn stats(State(state): State<ApiState>) -> Json<Value> {
    let memory = state.orchestrator.memory().stats().await;

    Json(json!({
        "rag": {
            "initialized": state.orchestrator.is_ready(),
            "document_count": state.orchestrator.document_count(),
            "vector_store_type": state.orchestrator.backend().to_string(),
        },
        "memory": memory,
    }))
}

async fn clear_conversation(
    State(state): State<ApiState>,
    Path(conversation_id): Path<String>,
) -> Json<Value> {
    state.orchestrator.memory().clear(&conversation_id).await;
    info!(conversation_id = %conversation_id, "Cleared conversation memory");

    Json(json!({ "status": "cleared", "conversation_id": conversation_id }))
}

async fn clear_all(State(state): State<ApiState>) -> Json<Value> {
    state.orchestrator.memory().clear_all().await;
    info!("Cleared all conversation memory");

    Json(json!({ "status": "cleared_all" }))
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<RagOrchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat_handler))
        .route("/stats", get(stats))
        .route("/memory", delete(clear_all))
        .route("/memory/:conversation_id", delete(clear_conversation))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server<F>(
    orchestrator: Arc<RagOrchestrator>,
    host: &str,
    port: u16,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind((host, port)).await?;

    info!("API Server listening on http://{}:{}", host, port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
