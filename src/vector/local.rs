//! In-process vector index
//!
//! Exact cosine scan over every entry vector. Vectors are persisted to
//! `<dir>/index.json` after a build and reused on the next start as long as
//! the file matches the current knowledge document.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{cosine_distance, RetrievalResult, RetrievedEntry};
use crate::embedding::EmbeddingProvider;
use crate::error::RagError;
use crate::knowledge::{corpus_fingerprint, load_or_empty, KnowledgeEntry};
use crate::Result;

pub const INDEX_FILE: &str = "index.json";
const FORMAT_VERSION: u32 = 2;

/// Where the local index gets its entries and keeps its vectors
#[derive(Debug, Clone)]
pub struct LocalSource {
    pub knowledge_base_path: PathBuf,
    pub persist_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedIndex {
    format_version: u32,
    model: String,
    dimension: usize,
    fingerprint: String,
    vectors: Vec<Vec<f32>>,
}

pub struct LocalIndex {
    entries: Vec<KnowledgeEntry>,
    vectors: Vec<Vec<f32>>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl LocalIndex {
    /// Load entries from the knowledge document and build over them.
    ///
    /// Any failure leaves an empty, not-ready index behind.
    pub async fn open(source: &LocalSource, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let entries = load_or_empty(&source.knowledge_base_path);

        match Self::build(entries, embedder.clone(), source.persist_dir.as_deref()).await {
            Ok(index) => index,
            Err(e) => {
                error!("Failed to build local vector index: {}", e);
                Self::empty(embedder)
            }
        }
    }

    pub fn empty(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            entries: Vec::new(),
            vectors: Vec::new(),
            embedder,
        }
    }

    /// Index `entries`, reusing persisted vectors from `persist_dir` when
    /// they still match, and saving freshly built ones.
    pub async fn build(
        entries: Vec<KnowledgeEntry>,
        embedder: Arc<dyn EmbeddingProvider>,
        persist_dir: Option<&Path>,
    ) -> Result<Self> {
        if entries.is_empty() {
            error!("No documents loaded from knowledge base");
            return Ok(Self::empty(embedder));
        }

        let fingerprint = corpus_fingerprint(&entries);

        if let Some(dir) = persist_dir {
            match load_persisted(dir, &fingerprint, &*embedder, entries.len()) {
                Ok(Some(vectors)) => {
                    info!("Vector store loaded from {}", dir.display());
                    return Ok(Self {
                        entries,
                        vectors,
                        embedder,
                    });
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to load vector store: {}, recreating...", e),
            }
        }

        info!("Creating vector store from {} documents...", entries.len());
        let texts: Vec<String> = entries.iter().map(KnowledgeEntry::embedding_text).collect();
        let vectors = embedder.embed_batch(&texts).await?;

        if vectors.len() != entries.len() {
            return Err(RagError::VectorStore(format!(
                "embedded {} of {} documents",
                vectors.len(),
                entries.len()
            )));
        }

        if let Some(dir) = persist_dir {
            let persisted = PersistedIndex {
                format_version: FORMAT_VERSION,
                model: embedder.model().to_string(),
                dimension: embedder.dimension(),
                fingerprint,
                vectors,
            };
            match save_persisted(dir, &persisted) {
                Ok(()) => info!("Vector store saved to {}", dir.display()),
                Err(e) => warn!("Failed to save vector store to {}: {}", dir.display(), e),
            }
            return Ok(Self {
                entries,
                vectors: persisted.vectors,
                embedder,
            });
        }

        Ok(Self {
            entries,
            vectors,
            embedder,
        })
    }

    pub async fn query(&self, text: &str, top_k: usize) -> RetrievalResult {
        if top_k == 0 || self.is_empty() {
            return RetrievalResult::empty();
        }

        let query_vector = match self.embedder.embed(text).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!("Query embedding failed, skipping retrieval: {}", e);
                return RetrievalResult::empty();
            }
        };

        RetrievalResult {
            hits: self.nearest(&query_vector, top_k),
        }
    }

    /// Top-k by ascending distance; equal distances keep load order.
    fn nearest(&self, query_vector: &[f32], top_k: usize) -> Vec<RetrievedEntry> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (position, cosine_distance(query_vector, vector)))
            .collect();

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        scored
            .into_iter()
            .take(top_k)
            .map(|(position, distance)| RetrievedEntry {
                entry: self.entries[position].clone(),
                distance,
            })
            .collect()
    }

    pub fn is_ready(&self) -> bool {
        !self.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Persisted vectors if the file exists and matches the current corpus.
fn load_persisted(
    dir: &Path,
    fingerprint: &str,
    embedder: &dyn EmbeddingProvider,
    entry_count: usize,
) -> Result<Option<Vec<Vec<f32>>>> {
    let dimension = embedder.dimension();
    let path = dir.join(INDEX_FILE);
    if !path.exists() {
        return Ok(None);
    }

    info!("Loading vector store from {}", dir.display());
    let bytes = std::fs::read(&path)?;
    let persisted: PersistedIndex = serde_json::from_slice(&bytes)?;

    if persisted.format_version != FORMAT_VERSION {
        return Err(RagError::VectorStore(format!(
            "unsupported index format {}",
            persisted.format_version
        )));
    }
    if persisted.model != embedder.model() {
        return Err(RagError::VectorStore(format!(
            "index was built with {}, provider is {}",
            persisted.model,
            embedder.model()
        )));
    }
    if persisted.dimension != dimension
        || persisted.vectors.iter().any(|v| v.len() != dimension)
    {
        return Err(RagError::VectorStore(format!(
            "index dimension {} does not match provider dimension {}",
            persisted.dimension, dimension
        )));
    }
    if persisted.vectors.len() != entry_count || persisted.fingerprint != fingerprint {
        return Err(RagError::VectorStore(
            "index is stale for the current knowledge base".into(),
        ));
    }

    Ok(Some(persisted.vectors))
}

fn save_persisted(dir: &Path, persisted: &PersistedIndex) -> Result<()> {
    std::fs::create_dir_all(dir)?;

    let tmp = dir.join(format!("{}.tmp", INDEX_FILE));
    std::fs::write(&tmp, serde_json::to_vec(persisted)?)?;
    std::fs::rename(&tmp, dir.join(INDEX_FILE))?;
    Ok(())
}
