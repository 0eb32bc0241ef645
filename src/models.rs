//! Shared data types
//!
//! Caller-supplied financial data plus the request/response shapes the
//! service layer exchanges with the mobile client.

use serde::{Deserialize, Serialize};

/// Financial data collected on-device and forwarded with each question.
///
/// All fields are opaque, pre-rendered text; an empty field is simply left
/// out of the prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialContext {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub budget_context: String,
    #[serde(default)]
    pub pattern_context: String,
}

impl FinancialContext {
    pub fn with_summary(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Self::default()
        }
    }
}

/// A knowledge entry reported back as grounding for an answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: String,
    pub topic: String,
    pub category: String,
}

/// =============================
/// Service Layer Models
/// =============================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub user_id: i64,
    pub wallet_id: i64,
    pub message: String,
    #[serde(default)]
    pub financial_context: FinancialContext,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    /// Conversation id to use for memory, derived from the user and wallet
    /// when the client did not send one.
    pub fn resolved_conversation_id(&self) -> String {
        match self.conversation_id.as_deref() {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => format!("user_{}_wallet_{}", self.user_id, self.wallet_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub sources: Vec<SourceDocument>,
    pub conversation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub knowledge_base_loaded: bool,
    pub document_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_financial_context_defaults_missing_fields() {
        let ctx: FinancialContext =
            serde_json::from_str(r#"{"summary": "Thu nhập: 10tr"}"#).unwrap();
        assert_eq!(ctx.summary, "Thu nhập: 10tr");
        assert!(ctx.budget_context.is_empty());
        assert!(ctx.pattern_context.is_empty());
    }

    #[test]
    fn test_conversation_id_fallback() {
        let mut req: ChatRequest = serde_json::from_str(
            r#"{"user_id": 7, "wallet_id": 2, "message": "hi"}"#,
        )
        .unwrap();
        assert_eq!(req.resolved_conversation_id(), "user_7_wallet_2");

        req.conversation_id = Some("   ".to_string());
        assert_eq!(req.resolved_conversation_id(), "user_7_wallet_2");

        req.conversation_id = Some("conv-42".to_string());
        assert_eq!(req.resolved_conversation_id(), "conv-42");
    }
}
