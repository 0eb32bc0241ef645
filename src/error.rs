//! Error types for the retrieval-augmented answering pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {

    // =============================
    // Resource Errors
    // =============================

    #[error("Knowledge base not found: {}", .0.display())]
    KnowledgeBaseNotFound(PathBuf),

    #[error("Knowledge base format error: {0}")]
    KnowledgeBaseFormat(String),

    // =============================
    // Transport Errors
    // =============================

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Remote vector store error: {0}")]
    RemoteStore(String),

    #[error("LLM error: {0}")]
    Llm(String),

    // =============================
    // Configuration Errors
    // =============================

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
