//! Upload the knowledge base into the Cosmos DB vector container.
//!
//! The container (vector-embedding policy, `/category` partition key) must
//! already exist.

use financial_rag_orchestrator::{
    config::Settings,
    embedding::{provider_from_settings, EmbeddingBackend},
    error::RagError,
    knowledge::{load_knowledge_base, KnowledgeEntry},
    vector::{CosmosCollection, RemoteDocument},
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const PROGRESS_EVERY: usize = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("financial_rag_orchestrator=info,kb_upload=info")),
        )
        .init();

    if let Err(e) = upload().await {
        error!("Knowledge base upload failed: {}", e);
        return Err(e.into());
    }
    Ok(())
}

async fn upload() -> Result<(), RagError> {
    let settings = Settings::from_env()?;

    if settings.embedding_provider == EmbeddingBackend::Hashing {
        return Err(RagError::Config(
            "hashing embeddings cannot be uploaded; use EMBEDDING_PROVIDER=onnx or http".into(),
        ));
    }

    let config = settings.cosmos_config().ok_or_else(|| {
        RagError::Config("COSMOS_DB_ENDPOINT and COSMOS_DB_KEY must be set".into())
    })?;

    info!(
        database = %config.database,
        container = %config.container,
        "Uploading knowledge base to Cosmos DB"
    );

    let entries = load_knowledge_base(&settings.knowledge_base_path)?;
    info!("Loaded {} documents from {}", entries.len(), settings.knowledge_base_path.display());

    let embedder = provider_from_settings(&settings).await?;
    let collection = CosmosCollection::new(config)?;

    let texts: Vec<String> = entries.iter().map(KnowledgeEntry::embedding_text).collect();
    let embeddings = embedder.embed_batch(&texts).await?;

    if embeddings.len() != entries.len() {
        return Err(RagError::Embedding(format!(
            "embedded {} of {} documents",
            embeddings.len(),
            entries.len()
        )));
    }

    let total = entries.len();
    for (n, (entry, embedding)) in entries.iter().zip(embeddings).enumerate() {
        collection
            .upsert(&RemoteDocument::from_entry(entry, embedding))
            .await?;

        if (n + 1) % PROGRESS_EVERY == 0 {
            info!("Uploaded {}/{} documents", n + 1, total);
        }
    }

    info!("✅ Uploaded {} documents", total);
    Ok(())
}
