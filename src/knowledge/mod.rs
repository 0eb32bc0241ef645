//! Financial knowledge base
//!
//! Flattens the bilingual knowledge document into typed entries. The
//! document is a JSON object whose top-level keys are either reserved
//! metadata or category names holding arrays of entries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{error, info};

use crate::error::RagError;
use crate::models::SourceDocument;
use crate::Result;

/// Top-level keys that carry document metadata rather than a category
pub const RESERVED_KEYS: &[&str] = &["version", "lastUpdated", "description"];

/// One unit of curated financial knowledge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub topic: String,
    pub category: String,
    /// English content
    pub content_en: String,
    /// Vietnamese content
    pub content_vi: String,
    pub keywords: Vec<String>,
}

impl KnowledgeEntry {
    /// Composite text fed to the embedding provider.
    pub fn embedding_text(&self) -> String {
        format!(
            "Topic: {}\nCategory: {}\nEnglish: {}\nVietnamese: {}\nKeywords: {}",
            self.topic,
            self.category,
            self.content_en,
            self.content_vi,
            self.keywords.join(", ")
        )
    }

    /// Vietnamese content when available, English otherwise
    pub fn preferred_content(&self) -> &str {
        if self.content_vi.is_empty() {
            &self.content_en
        } else {
            &self.content_vi
        }
    }

    pub fn source(&self) -> SourceDocument {
        SourceDocument {
            id: self.id.clone(),
            topic: self.topic.clone(),
            category: self.category.clone(),
        }
    }

    fn from_raw(category: &str, raw: &Map<String, Value>) -> Self {
        let text = |field: &str| -> String {
            raw.get(field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let keywords = raw
            .get("keywords")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: text("id"),
            topic: text("topic"),
            category: category.to_string(),
            content_en: text("content_en"),
            content_vi: text("content_vi"),
            keywords,
        }
    }
}

/// Load the knowledge document at `path`.
///
/// Entry order follows document order. Absent fields default to empty; a
/// category whose value is not an array, or an item that is not an object,
/// is skipped.
pub fn load_knowledge_base(path: &Path) -> Result<Vec<KnowledgeEntry>> {
    if !path.exists() {
        return Err(RagError::KnowledgeBaseNotFound(path.to_path_buf()));
    }

    let raw = std::fs::read_to_string(path)?;
    let document: Value = serde_json::from_str(&raw)
        .map_err(|e| RagError::KnowledgeBaseFormat(format!("{}: {}", path.display(), e)))?;

    let Some(categories) = document.as_object() else {
        return Err(RagError::KnowledgeBaseFormat(format!(
            "{}: top level must be an object",
            path.display()
        )));
    };

    let mut entries = Vec::new();

    for (category, items) in categories {
        if RESERVED_KEYS.contains(&category.as_str()) {
            continue;
        }
        let Some(items) = items.as_array() else {
            continue;
        };

        entries.extend(
            items
                .iter()
                .filter_map(Value::as_object)
                .map(|raw| KnowledgeEntry::from_raw(category, raw)),
        );
    }

    info!("Loaded {} knowledge documents from {}", entries.len(), path.display());
    Ok(entries)
}

/// Load the knowledge document, treating any failure as an empty corpus.
pub fn load_or_empty(path: &Path) -> Vec<KnowledgeEntry> {
    match load_knowledge_base(path) {
        Ok(entries) => entries,
        Err(e) => {
            error!("{}", e);
            Vec::new()
        }
    }
}

/// SHA-256 over every entry's embedding text, hex encoded.
///
/// Changes whenever any entry, or the entry order, changes.
pub fn corpus_fingerprint(entries: &[KnowledgeEntry]) -> String {
    let mut hasher = Sha256::new();

    for entry in entries {
        hasher.update(entry.embedding_text().as_bytes());
        hasher.update([0u8]);
    }

    hex::encode(hasher.finalize())
}
