//! Deterministic offline responder
//!
//! Used whenever the LLM cannot be reached. Pure function of the query and
//! the financial context.

use crate::models::FinancialContext;

const SPENDING_TERMS: &[&str] = &["chi tiêu", "tiêu", "spend"];
const SAVING_TERMS: &[&str] = &["tiết kiệm", "save"];

const SPENDING_ADVICE: &str = "• Theo dõi chi tiêu hàng ngày để kiểm soát tốt hơn\n\
                               • Ưu tiên các khoản chi tiêu cần thiết\n\
                               • Cân nhắc giảm chi tiêu không cần thiết";

const SAVING_ADVICE: &str = "• Đặt mục tiêu tiết kiệm cụ thể và khả thi\n\
                             • Tự động chuyển tiền tiết kiệm mỗi tháng\n\
                             • Áp dụng quy tắc 50/30/20";

const GENERAL_ADVICE: &str = "• Theo dõi tài chính đều đặn\n\
                              • Cân bằng giữa chi tiêu và tiết kiệm\n\
                              • Đặt mục tiêu tài chính rõ ràng";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdviceTopic {
    Spending,
    Saving,
    General,
}

impl AdviceTopic {
    /// Spending terms win over saving terms.
    pub fn classify(query: &str) -> Self {
        let query = query.to_lowercase();

        if SPENDING_TERMS.iter().any(|term| query.contains(term)) {
            AdviceTopic::Spending
        } else if SAVING_TERMS.iter().any(|term| query.contains(term)) {
            AdviceTopic::Saving
        } else {
            AdviceTopic::General
        }
    }

    fn advice(self) -> &'static str {
        match self {
            AdviceTopic::Spending => SPENDING_ADVICE,
            AdviceTopic::Saving => SAVING_ADVICE,
            AdviceTopic::General => GENERAL_ADVICE,
        }
    }
}

pub fn fallback_response(query: &str, context: &FinancialContext) -> String {
    let mut out = String::new();

    if !context.summary.is_empty() {
        out.push_str(&context.summary);
        out.push('\n');
    }

    out.push_str("\n💡 Lời khuyên:\n");
    out.push_str(AdviceTopic::classify(query).advice());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spending_template() {
        let response = fallback_response("How much did I SPEND last month?", &FinancialContext::default());
        assert_eq!(
            response,
            "\n💡 Lời khuyên:\n\
             • Theo dõi chi tiêu hàng ngày để kiểm soát tốt hơn\n\
             • Ưu tiên các khoản chi tiêu cần thiết\n\
             • Cân nhắc giảm chi tiêu không cần thiết"
        );
    }

    #[test]
    fn test_spending_beats_saving() {
        assert_eq!(
            AdviceTopic::classify("tiết kiệm hay chi tiêu?"),
            AdviceTopic::Spending
        );
        assert_eq!(AdviceTopic::classify("Làm sao TIẾT KIỆM"), AdviceTopic::Saving);
        assert_eq!(AdviceTopic::classify("I want to save"), AdviceTopic::Saving);
        assert_eq!(AdviceTopic::classify("xin chào"), AdviceTopic::General);
    }

    #[test]
    fn test_summary_is_prefixed() {
        let ctx = FinancialContext::with_summary("Thu nhập: 15.000.000đ");
        let response = fallback_response("hello", &ctx);
        assert!(response.starts_with("Thu nhập: 15.000.000đ\n\n💡 Lời khuyên:\n"));
        assert!(response.ends_with("• Đặt mục tiêu tài chính rõ ràng"));
    }

    #[test]
    fn test_pure_and_total() {
        let ctx = FinancialContext {
            summary: "\u{0}\u{FFFF}".into(),
            budget_context: "ignored".into(),
            pattern_context: String::new(),
        };
        for query in ["", "💸💸", "\n\t", "SPENDING spree", &"x".repeat(10_000)] {
            assert_eq!(fallback_response(query, &ctx), fallback_response(query, &ctx));
        }
    }
}
