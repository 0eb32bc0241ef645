//! Vector similarity search over the knowledge base
//!
//! Two interchangeable backends answer the same top-k cosine query:
//! - `LocalIndex`: exact in-process scan, persisted to a directory
//! - `RemoteIndex`: server-side nearest-neighbour search in a hosted collection
//!
//! The backend is chosen once, when the index is initialized. A remote
//! backend that is missing credentials or fails its connectivity check is
//! replaced by the local one for the rest of the process.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Settings;
use crate::embedding::{EmbeddingProvider, HASHING_MODEL};
use crate::error::RagError;
use crate::knowledge::KnowledgeEntry;
use crate::models::SourceDocument;

pub mod cosmos;
pub mod local;
pub mod remote;

pub use cosmos::{CosmosCollection, CosmosConfig, RemoteDocument};
pub use local::{LocalIndex, LocalSource};
pub use remote::{RemoteIndex, VectorCollection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Remote,
}

impl FromStr for BackendKind {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "faiss" => Ok(BackendKind::Local),
            "remote" | "cosmos" => Ok(BackendKind::Remote),
            other => Err(RagError::Config(format!(
                "unknown VECTOR_STORE_TYPE {:?} (expected local or remote)",
                other
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => f.write_str("local"),
            BackendKind::Remote => f.write_str("remote"),
        }
    }
}

/// A knowledge entry matched by a query
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedEntry {
    pub entry: KnowledgeEntry,
    /// Cosine distance to the query, `1 - cos`
    pub distance: f32,
}

/// Top-k hits for one query, ascending by distance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalResult {
    pub hits: Vec<RetrievedEntry>,
}

impl RetrievalResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RetrievedEntry> {
        self.hits.iter()
    }

    pub fn sources(&self) -> Vec<SourceDocument> {
        self.hits.iter().map(|hit| hit.entry.source()).collect()
    }
}

/// Cosine distance between two vectors.
///
/// Mismatched lengths or a zero vector give the neutral distance 1.0.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }

    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// The knowledge index, fixed to one backend for its whole lifetime
pub enum VectorIndex {
    Local(LocalIndex),
    Remote(RemoteIndex),
}

impl VectorIndex {
    /// Build the index the settings ask for, downgrading to the local
    /// backend when the remote one cannot be used. Never fails: a local
    /// build problem yields an index that is simply not ready.
    pub async fn initialize(settings: &Settings, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let remote: Option<Arc<dyn VectorCollection>> = match settings.vector_store_type {
            BackendKind::Local => None,
            // uploaded vectors come from a sentence-transformer
            BackendKind::Remote if embedder.model() == HASHING_MODEL => {
                warn!(
                    "Remote vector store cannot be queried with the hashing embedder; \
                     using local index for this process"
                );
                None
            }
            BackendKind::Remote => match settings.cosmos_config() {
                None => {
                    warn!(
                        "Remote vector store selected but COSMOS_DB_ENDPOINT/COSMOS_DB_KEY are not set; \
                         using local index for this process"
                    );
                    None
                }
                Some(config) => match CosmosCollection::new(config) {
                    Ok(collection) => Some(Arc::new(collection)),
                    Err(e) => {
                        warn!("Invalid remote vector store configuration ({}); using local index", e);
                        None
                    }
                },
            },
        };

        let local = LocalSource {
            knowledge_base_path: settings.knowledge_base_path.clone(),
            persist_dir: Some(settings.vector_store_path.clone()),
        };

        Self::select(remote, local, embedder).await
    }

    /// Use `remote` if it answers, otherwise open the local index.
    pub async fn select(
        remote: Option<Arc<dyn VectorCollection>>,
        local: LocalSource,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        if let Some(collection) = remote {
            match RemoteIndex::build(collection, embedder.clone()).await {
                Ok(index) => {
                    info!(
                        documents = index.document_count(),
                        "Connected to remote vector store"
                    );
                    return VectorIndex::Remote(index);
                }
                Err(e) => {
                    warn!(
                        "Remote vector store unreachable ({}); using local index for this process",
                        e
                    );
                }
            }
        }

        VectorIndex::Local(LocalIndex::open(&local, embedder).await)
    }

    /// Top-k nearest entries to `text`. Empty when the index is not ready
    /// or the query could not be served.
    pub async fn query(&self, text: &str, top_k: usize) -> RetrievalResult {
        if !self.is_ready() {
            return RetrievalResult::empty();
        }

        match self {
            VectorIndex::Local(index) => index.query(text, top_k).await,
            VectorIndex::Remote(index) => index.query(text, top_k).await,
        }
    }

    pub fn is_ready(&self) -> bool {
        match self {
            VectorIndex::Local(index) => index.is_ready(),
            VectorIndex::Remote(index) => index.is_ready(),
        }
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            VectorIndex::Local(_) => BackendKind::Local,
            VectorIndex::Remote(_) => BackendKind::Remote,
        }
    }

    pub fn document_count(&self) -> usize {
        match self {
            VectorIndex::Local(index) => index.len(),
            VectorIndex::Remote(index) => index.document_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::{NamedTempFile, TempDir};

    const DOC: &str = r#"{
        "version": "1",
        "budgeting": [
            {"id": "b1", "topic": "Budgeting", "content_vi": "Hãy theo dõi chi tiêu", "keywords": ["budget"]},
            {"id": "b2", "topic": "Emergency fund", "content_en": "Keep six months of expenses", "keywords": ["emergency"]}
        ]
    }"#;

    fn knowledge_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(DOC.as_bytes()).unwrap();
        file
    }

    struct DownCollection;

    #[async_trait]
    impl VectorCollection for DownCollection {
        async fn count_documents(&self) -> Result<usize> {
            Err(RagError::RemoteStore("connection refused".into()))
        }

        async fn nearest(&self, _embedding: &[f32], _top_k: usize) -> Result<Vec<RetrievedEntry>> {
            Err(RagError::RemoteStore("connection refused".into()))
        }
    }

    struct UpCollection;

    #[async_trait]
    impl VectorCollection for UpCollection {
        async fn count_documents(&self) -> Result<usize> {
            Ok(12)
        }

        async fn nearest(&self, _embedding: &[f32], _top_k: usize) -> Result<Vec<RetrievedEntry>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_cosine_distance() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[1.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_backend_kind_display_round_trip() {
        for kind in [BackendKind::Local, BackendKind::Remote] {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
    }

    #[tokio::test]
    async fn test_remote_without_credentials_falls_back_to_local() {
        let kb = knowledge_file();
        let store = TempDir::new().unwrap();
        let env: HashMap<&str, String> = HashMap::from([
            ("VECTOR_STORE_TYPE", "cosmos".to_string()),
            ("KNOWLEDGE_BASE_PATH", kb.path().display().to_string()),
            ("VECTOR_STORE_PATH", store.path().display().to_string()),
        ]);
        let settings = Settings::from_lookup(|k| env.get(k).cloned()).unwrap();

        let index = VectorIndex::initialize(&settings, Arc::new(HashingEmbedder::new())).await;

        assert_eq!(index.backend(), BackendKind::Local);
        assert!(index.is_ready());
        assert_eq!(index.document_count(), 2);

        let result = index.query("theo dõi chi tiêu", 3).await;
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn test_hashing_embedder_never_pairs_with_remote() {
        let kb = knowledge_file();
        let store = TempDir::new().unwrap();
        let env: HashMap<&str, String> = HashMap::from([
            ("VECTOR_STORE_TYPE", "cosmos".to_string()),
            ("KNOWLEDGE_BASE_PATH", kb.path().display().to_string()),
            ("VECTOR_STORE_PATH", store.path().display().to_string()),
            ("COSMOS_DB_ENDPOINT", "http://127.0.0.1:9".to_string()),
            ("COSMOS_DB_KEY", "dGVzdC1tYXN0ZXIta2V5".to_string()),
        ]);
        let settings = Settings::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert!(settings.cosmos_config().is_some());

        let index = VectorIndex::initialize(&settings, Arc::new(HashingEmbedder::new())).await;

        assert_eq!(index.backend(), BackendKind::Local);
        assert_eq!(index.document_count(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_remote_selects_local() {
        let kb = knowledge_file();
        let local = LocalSource {
            knowledge_base_path: kb.path().to_path_buf(),
            persist_dir: None,
        };

        let index = VectorIndex::select(
            Some(Arc::new(DownCollection)),
            local,
            Arc::new(HashingEmbedder::new()),
        )
        .await;

        assert_eq!(index.backend(), BackendKind::Local);
        assert!(index.is_ready());
    }

    #[tokio::test]
    async fn test_healthy_remote_is_selected() {
        let local = LocalSource {
            knowledge_base_path: PathBuf::from("/unused/knowledge.json"),
            persist_dir: None,
        };

        let index = VectorIndex::select(
            Some(Arc::new(UpCollection)),
            local,
            Arc::new(HashingEmbedder::new()),
        )
        .await;

        assert_eq!(index.backend(), BackendKind::Remote);
        assert!(index.is_ready());
        assert_eq!(index.document_count(), 12);
    }

    #[tokio::test]
    async fn test_empty_local_index_is_not_ready() {
        let local = LocalSource {
            knowledge_base_path: PathBuf::from("/missing/knowledge.json"),
            persist_dir: None,
        };

        let index = VectorIndex::select(None, local, Arc::new(HashingEmbedder::new())).await;

        assert!(!index.is_ready());
        assert!(index.query("anything", 3).await.is_empty());
    }
}
