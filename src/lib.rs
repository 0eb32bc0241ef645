//! Financial RAG Orchestrator
//!
//! Retrieval-augmented chat core for a personal-finance assistant:
//! - Loads a bilingual financial knowledge base
//! - Embeds it into 384-dim vectors and indexes it locally or in Cosmos DB
//! - Keeps a TTL-bounded conversation window per user/wallet
//! - Answers through an LLM, degrading to deterministic advice when offline
//!
//! REQUEST FLOW:
//! QUERY → RETRIEVE → HISTORY → PROMPT → LLM (or FALLBACK) → RECORD

pub mod api;
pub mod config;
pub mod embedding;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod memory;
pub mod models;
pub mod rag;
pub mod vector;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use rag::{RagAnswer, RagOrchestrator, RagSettings};
