//! Process configuration
//!
//! Settings come from the environment (optionally seeded from a `.env` file).
//! Every key has a default so a bare checkout starts in offline mode: local
//! vector index, hashing embedder, and the deterministic fallback responder
//! whenever no LLM token is configured.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::embedding::EmbeddingBackend;
use crate::error::RagError;
use crate::llm::GenerationParams;
use crate::memory::MemoryConfig;
use crate::vector::{BackendKind, CosmosConfig};
use crate::Result;

#[derive(Debug, Clone)]
pub struct Settings {
    // OpenRouter / LLM
    pub openrouter_api_token: String,
    pub openrouter_model: String,
    pub openrouter_base_url: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,

    // Server
    pub host: String,
    pub port: u16,

    // RAG
    pub knowledge_base_path: PathBuf,
    pub vector_store_type: BackendKind,
    pub vector_store_path: PathBuf,
    pub rag_top_k: usize,

    // Embeddings
    pub embedding_provider: EmbeddingBackend,
    pub embedding_model: String,
    pub embedding_model_dir: PathBuf,
    pub embedding_endpoint: Option<String>,
    pub embedding_api_key: Option<String>,

    // Azure Cosmos DB
    pub cosmos_db_endpoint: String,
    pub cosmos_db_key: String,
    pub cosmos_db_database: String,
    pub cosmos_db_container: String,

    // Memory
    pub memory_window_size: usize,
    pub memory_ttl_seconds: u64,
    pub memory_cleanup_interval_seconds: u64,
}

impl Settings {
    /// Load settings from `.env` (if present) and the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| -> String {
            lookup(key).unwrap_or_else(|| default.to_string())
        };
        let optional = |key: &str| -> Option<String> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let vector_store_type = text("VECTOR_STORE_TYPE", "local").parse::<BackendKind>()?;

        let embedding_endpoint = optional("EMBEDDING_ENDPOINT");
        // an endpoint on its own selects the HTTP provider
        let embedding_provider = match optional("EMBEDDING_PROVIDER") {
            Some(name) => name.parse::<EmbeddingBackend>()?,
            None if embedding_endpoint.is_some() => EmbeddingBackend::Http,
            None => EmbeddingBackend::Onnx,
        };

        let settings = Self {
            openrouter_api_token: text("OPENROUTER_API_TOKEN", ""),
            openrouter_model: text("OPENROUTER_MODEL", "mistralai/devstral-2512:free"),
            openrouter_base_url: text("OPENROUTER_BASE_URL", "https://openrouter.ai/api/v1"),
            llm_temperature: parse_or(&lookup, "LLM_TEMPERATURE", 0.7)?,
            llm_max_tokens: parse_or(&lookup, "LLM_MAX_TOKENS", 500)?,

            host: text("HOST", "0.0.0.0"),
            port: parse_or(&lookup, "PORT", 8000)?,

            knowledge_base_path: PathBuf::from(text(
                "KNOWLEDGE_BASE_PATH",
                "knowledge/financial_knowledge_base.json",
            )),
            vector_store_type,
            vector_store_path: PathBuf::from(text("VECTOR_STORE_PATH", "vector_store")),
            rag_top_k: parse_or(&lookup, "RAG_TOP_K", 3)?,

            embedding_provider,
            embedding_model: text("EMBEDDING_MODEL", "sentence-transformers/all-MiniLM-L6-v2"),
            embedding_model_dir: PathBuf::from(text("EMBEDDING_MODEL_DIR", "models")),
            embedding_endpoint,
            embedding_api_key: optional("EMBEDDING_API_KEY"),

            cosmos_db_endpoint: text("COSMOS_DB_ENDPOINT", ""),
            cosmos_db_key: text("COSMOS_DB_KEY", ""),
            cosmos_db_database: text("COSMOS_DB_DATABASE", "mymoney"),
            cosmos_db_container: text("COSMOS_DB_CONTAINER", "knowledge_vectors"),

            memory_window_size: parse_or(&lookup, "MEMORY_WINDOW_SIZE", 10)?,
            memory_ttl_seconds: parse_or(&lookup, "MEMORY_TTL_SECONDS", 3600)?,
            memory_cleanup_interval_seconds: parse_or(
                &lookup,
                "MEMORY_CLEANUP_INTERVAL_SECONDS",
                60,
            )?,
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.memory_window_size == 0 {
            return Err(RagError::Config("MEMORY_WINDOW_SIZE must be at least 1".into()));
        }
        if self.embedding_provider == EmbeddingBackend::Http && self.embedding_endpoint.is_none() {
            return Err(RagError::Config(
                "EMBEDDING_PROVIDER=http requires EMBEDDING_ENDPOINT".into(),
            ));
        }
        if self.rag_top_k == 0 {
            return Err(RagError::Config("RAG_TOP_K must be at least 1".into()));
        }
        if self.memory_cleanup_interval_seconds == 0 {
            return Err(RagError::Config(
                "MEMORY_CLEANUP_INTERVAL_SECONDS must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn memory_config(&self) -> MemoryConfig {
        MemoryConfig {
            window_size: self.memory_window_size,
            ttl: Duration::from_secs(self.memory_ttl_seconds),
            cleanup_interval: Duration::from_secs(self.memory_cleanup_interval_seconds),
        }
    }

    /// Remote store connection details; `None` when credentials are missing.
    pub fn cosmos_config(&self) -> Option<CosmosConfig> {
        if self.cosmos_db_endpoint.trim().is_empty() || self.cosmos_db_key.trim().is_empty() {
            return None;
        }

        Some(CosmosConfig {
            endpoint: self.cosmos_db_endpoint.trim().to_string(),
            key: self.cosmos_db_key.trim().to_string(),
            database: self.cosmos_db_database.clone(),
            container: self.cosmos_db_container.clone(),
        })
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.llm_temperature,
            max_tokens: self.llm_max_tokens,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| RagError::Config(format!("{}={:?}: {}", key, raw, e))),
    }
}
