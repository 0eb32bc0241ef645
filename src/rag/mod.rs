//! RAG Orchestrator
//!
//! Answers one question: retrieve knowledge, read the conversation window,
//! call the LLM, and record the exchange. An unreachable LLM degrades to the
//! deterministic fallback responder instead of failing the request.

use std::sync::Arc;
use tracing::{error, info};

use crate::llm::{ChatModel, GenerationParams};
use crate::memory::ConversationMemory;
use crate::models::{FinancialContext, SourceDocument};
use crate::vector::{BackendKind, RetrievalResult, VectorIndex};

pub mod fallback;
pub mod prompt;

pub use fallback::fallback_response;

#[derive(Debug, Clone)]
pub struct RagSettings {
    pub top_k: usize,
    pub generation: GenerationParams,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            generation: GenerationParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RagAnswer {
    pub response: String,
    pub sources: Vec<SourceDocument>,
}

pub struct RagOrchestrator {
    index: Arc<VectorIndex>,
    memory: Arc<ConversationMemory>,
    llm: Arc<dyn ChatModel>,
    settings: RagSettings,
}

impl RagOrchestrator {
    pub fn new(
        index: Arc<VectorIndex>,
        memory: Arc<ConversationMemory>,
        llm: Arc<dyn ChatModel>,
        settings: RagSettings,
    ) -> Self {
        Self {
            index,
            memory,
            llm,
            settings,
        }
    }

    /// Produce an answer for `query` within `conversation_id`.
    ///
    /// Never fails: retrieval problems yield no sources, LLM problems yield
    /// the fallback text. The exchange is recorded either way.
    pub async fn answer(
        &self,
        query: &str,
        context: &FinancialContext,
        conversation_id: &str,
    ) -> RagAnswer {
        let retrieved = if self.index.is_ready() {
            self.index.query(query, self.settings.top_k).await
        } else {
            RetrievalResult::empty()
        };

        let history = self.memory.get_history(conversation_id).await;
        let messages = prompt::build_messages(query, context, &retrieved, &history);

        let response = match self.llm.complete(&messages, &self.settings.generation).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                error!(conversation_id = %conversation_id, "LLM returned an empty completion, using fallback");
                fallback_response(query, context)
            }
            Err(e) => {
                error!(conversation_id = %conversation_id, "LLM call failed ({}), using fallback", e);
                fallback_response(query, context)
            }
        };

        self.memory
            .add_exchange(conversation_id, query, &response)
            .await;

        info!(
            conversation_id = %conversation_id,
            sources = retrieved.len(),
            history = history.len(),
            "Answered query"
        );

        RagAnswer {
            response,
            sources: retrieved.sources(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.index.is_ready()
    }

    pub fn document_count(&self) -> usize {
        self.index.document_count()
    }

    pub fn backend(&self) -> BackendKind {
        self.index.backend()
    }

    pub fn memory(&self) -> &Arc<ConversationMemory> {
        &self.memory
    }
}
