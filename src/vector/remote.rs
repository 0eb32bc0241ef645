//! Hosted vector collection backend
//!
//! The collection already holds one document per knowledge entry, uploaded
//! out of band. Queries are embedded locally and the nearest-neighbour
//! search runs server-side.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::warn;

use super::{RetrievalResult, RetrievedEntry};
use crate::embedding::EmbeddingProvider;
use crate::Result;

/// Trait for a server-side vector search collection
#[async_trait]
pub trait VectorCollection: Send + Sync {
    /// Check connectivity; returns the number of stored documents
    async fn count_documents(&self) -> Result<usize>;

    /// Up to `top_k` documents nearest to `embedding`, ascending by distance
    async fn nearest(&self, embedding: &[f32], top_k: usize) -> Result<Vec<RetrievedEntry>>;
}

pub struct RemoteIndex {
    collection: Arc<dyn VectorCollection>,
    embedder: Arc<dyn EmbeddingProvider>,
    document_count: usize,
}

impl RemoteIndex {
    /// Connect to the collection. Fails if the collection cannot be reached.
    pub async fn build(
        collection: Arc<dyn VectorCollection>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let document_count = collection.count_documents().await?;

        Ok(Self {
            collection,
            embedder,
            document_count,
        })
    }

    pub async fn query(&self, text: &str, top_k: usize) -> RetrievalResult {
        if top_k == 0 {
            return RetrievalResult::empty();
        }

        let embedding = match self.embedder.embed(text).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Query embedding failed, skipping retrieval: {}", e);
                return RetrievalResult::empty();
            }
        };

        match self.collection.nearest(&embedding, top_k).await {
            Ok(mut hits) => {
                hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
                hits.truncate(top_k);
                RetrievalResult { hits }
            }
            Err(e) => {
                warn!("Remote vector query failed, skipping retrieval: {}", e);
                RetrievalResult::empty()
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        true
    }

    /// Document count reported at connect time
    pub fn document_count(&self) -> usize {
        self.document_count
    }
}
