use financial_rag_orchestrator::{
    api::start_server,
    config::Settings,
    embedding::{provider_from_settings, EmbeddingProvider},
    llm::OpenRouterClient,
    memory::{ConversationMemory, MemoryJanitor},
    rag::{RagOrchestrator, RagSettings},
    vector::VectorIndex,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "financial_rag_orchestrator=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG may come from .env
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let settings = Settings::from_env().map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;

    info!("🚀 Financial RAG Orchestrator - API Server");
    info!("📍 {}:{}", settings.host, settings.port);

    if settings.openrouter_api_token.is_empty() {
        info!("⚠️  OPENROUTER_API_TOKEN not set, answers will use offline advice");
    }

    // Create components
    let embedder = provider_from_settings(&settings).await.map_err(|e| {
        error!("Embedding provider unavailable: {}", e);
        e
    })?;
    info!(model = embedder.model(), "✅ Embedding provider ready");
    let index = Arc::new(VectorIndex::initialize(&settings, embedder).await);
    info!(
        backend = %index.backend(),
        ready = index.is_ready(),
        documents = index.document_count(),
        "✅ Vector index initialized"
    );

    let memory = Arc::new(ConversationMemory::new(settings.memory_config()));
    let janitor = MemoryJanitor::start(memory.clone());

    let llm = match OpenRouterClient::new(
        settings.openrouter_api_token.clone(),
        settings.openrouter_model.clone(),
        settings.openrouter_base_url.clone(),
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to create LLM client: {}", e);
            janitor.shutdown().await;
            return Err(e.into());
        }
    };
    info!(model = llm.model(), "✅ LLM client ready");

    let orchestrator = Arc::new(RagOrchestrator::new(
        index,
        memory,
        llm,
        RagSettings {
            top_k: settings.rag_top_k,
            generation: settings.generation_params(),
        },
    ));

    info!("📡 Starting API server...");
    let served = start_server(orchestrator, &settings.host, settings.port, shutdown_signal()).await;
    if let Err(e) = &served {
        error!("API server failed: {}", e);
    }

    janitor.shutdown().await;
    info!("👋 Shutdown complete");

    served.map_err(Into::into)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
