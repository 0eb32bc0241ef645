//! Text embedding providers
//!
//! Every provider returns unit-length vectors of a fixed dimension so the
//! vector index can treat cosine distance as `1 - dot`.
//!
//! - `OnnxEmbedder`: sentence-transformer run in-process (default)
//! - `HttpEmbedder`: OpenAI-compatible embeddings endpoint
//! - `HashingEmbedder`: lexical feature hashing, offline opt-in only

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::RagError;
use crate::Result;

pub mod hashing;
pub mod http;
pub mod onnx;

pub use hashing::{HashingEmbedder, HASHING_MODEL};
pub use http::HttpEmbedder;
pub use onnx::{ModelFiles, OnnxEmbedder};

/// Output dimension of all-MiniLM-L6-v2
pub const EMBEDDING_DIM: usize = 384;

/// Trait for text → vector embedding
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Model identifier. Vectors are only comparable between equal ids.
    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Scale `vector` to unit L2 norm. The zero vector is left unchanged.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Which embedding provider to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Onnx,
    Http,
    Hashing,
}

impl FromStr for EmbeddingBackend {
    type Err = RagError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "onnx" | "local" => Ok(EmbeddingBackend::Onnx),
            "http" | "endpoint" => Ok(EmbeddingBackend::Http),
            "hashing" | "offline" => Ok(EmbeddingBackend::Hashing),
            other => Err(RagError::Config(format!(
                "unknown EMBEDDING_PROVIDER {:?} (expected onnx, http or hashing)",
                other
            ))),
        }
    }
}

impl fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingBackend::Onnx => f.write_str("onnx"),
            EmbeddingBackend::Http => f.write_str("http"),
            EmbeddingBackend::Hashing => f.write_str("hashing"),
        }
    }
}

/// Build the provider named by the settings.
///
/// Any failure here is fatal to startup: the ONNX model must load, and a
/// configured endpoint must answer a test embedding.
pub async fn provider_from_settings(settings: &Settings) -> Result<Arc<dyn EmbeddingProvider>> {
    match settings.embedding_provider {
        EmbeddingBackend::Onnx => {
            let files = ModelFiles::new(
                settings.embedding_model.clone(),
                settings.embedding_model_dir.clone(),
            );
            Ok(Arc::new(OnnxEmbedder::load(&files).await?))
        }
        EmbeddingBackend::Http => {
            let endpoint = settings.embedding_endpoint.clone().ok_or_else(|| {
                RagError::Config("EMBEDDING_PROVIDER=http requires EMBEDDING_ENDPOINT".into())
            })?;
            let embedder = HttpEmbedder::connect(
                endpoint.clone(),
                settings.embedding_model.clone(),
                settings.embedding_api_key.clone(),
            )
            .await?;
            info!(
                endpoint = %endpoint,
                model = %settings.embedding_model,
                "Using remote embedding endpoint"
            );
            Ok(Arc::new(embedder))
        }
        EmbeddingBackend::Hashing => {
            warn!("Using lexical hashing embedder; retrieval has no semantic matching");
            Ok(Arc::new(HashingEmbedder::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_backend_names() {
        assert_eq!("ONNX".parse::<EmbeddingBackend>().unwrap(), EmbeddingBackend::Onnx);
        assert_eq!("offline".parse::<EmbeddingBackend>().unwrap(), EmbeddingBackend::Hashing);
        assert!("word2vec".parse::<EmbeddingBackend>().is_err());
        assert_eq!(EmbeddingBackend::Http.to_string(), "http");
    }

    #[tokio::test]
    async fn test_hashing_provider_is_explicit_opt_in() {
        let settings = Settings::from_lookup(|key| match key {
            "EMBEDDING_PROVIDER" => Some("hashing".to_string()),
            _ => None,
        })
        .unwrap();

        let embedder = provider_from_settings(&settings).await.unwrap();
        assert_eq!(embedder.model(), hashing::HASHING_MODEL);
        assert_eq!(embedder.dimension(), EMBEDDING_DIM);
    }

    #[test]
    fn test_normalize_zero_vector_unchanged() {
        let mut v = vec![0.0; 4];
        normalize(&mut v);
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
