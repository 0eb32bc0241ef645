//! Prompt assembly
//!
//! System message: persona, retrieved knowledge, answering rules.
//! User message: on-device financial data followed by the question.

use crate::llm::ChatMessage;
use crate::memory::{ConversationMessage, MessageRole};
use crate::models::FinancialContext;
use crate::vector::RetrievalResult;

const PERSONA: &str = "Bạn là trợ lý tài chính cá nhân thông minh của ứng dụng MyMoney. \
                       Hãy đưa ra lời khuyên dựa trên dữ liệu thực tế của người dùng \
                       và kiến thức tài chính bên dưới.\n\n";

pub const KNOWLEDGE_HEADER: &str = "[KIẾN THỨC TÀI CHÍNH]\n";
pub const DATA_HEADER: &str = "[DỮ LIỆU TÀI CHÍNH]\n";
pub const QUESTION_HEADER: &str = "[CÂU HỎI]\n";

const RULES: &[&str] = &[
    "Trả lời ngắn gọn (3-5 câu), tập trung vào hành động cụ thể",
    "Sử dụng số liệu thực từ dữ liệu người dùng khi được hỏi",
    "Áp dụng kiến thức tài chính để đưa ra lời khuyên phù hợp",
    "Nếu không có đủ dữ liệu, hãy đưa ra lời khuyên chung",
    "Nếu có lịch sử hội thoại, hãy tham chiếu bối cảnh trước đó",
];

pub fn build_system_prompt(retrieved: &RetrievalResult) -> String {
    let mut prompt = String::from(PERSONA);

    if !retrieved.is_empty() {
        prompt.push_str(KNOWLEDGE_HEADER);
        for hit in retrieved.iter() {
            prompt.push_str(&format!(
                "• {}: {}\n",
                hit.entry.topic,
                hit.entry.preferred_content()
            ));
        }
        prompt.push('\n');
    }

    prompt.push_str("Quy tắc:\n");
    for (n, rule) in RULES.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", n + 1, rule));
    }

    prompt
}

pub fn build_user_prompt(query: &str, context: &FinancialContext) -> String {
    let mut prompt = String::new();

    if !context.summary.is_empty() {
        prompt.push_str(DATA_HEADER);
        prompt.push_str(&context.summary);
        prompt.push('\n');
    }

    for extra in [&context.budget_context, &context.pattern_context] {
        if !extra.is_empty() {
            prompt.push_str(extra);
            prompt.push('\n');
        }
    }

    prompt.push_str(QUESTION_HEADER);
    prompt.push_str(query);
    prompt
}

/// System message, then history in stored order, then the new question.
pub fn build_messages(
    query: &str,
    context: &FinancialContext,
    retrieved: &RetrievalResult,
    history: &[ConversationMessage],
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);

    messages.push(ChatMessage::system(build_system_prompt(retrieved)));

    for turn in history {
        match turn.role {
            MessageRole::Human => messages.push(ChatMessage::human(turn.content.as_str())),
            MessageRole::Assistant => messages.push(ChatMessage::assistant(turn.content.as_str())),
            // only exchanges are recorded
            MessageRole::System => {}
        }
    }

    messages.push(ChatMessage::human(build_user_prompt(query, context)));
    messages
}
