//! OpenRouter chat-completions client
//!
//! Speaks the OpenAI-compatible `/chat/completions` protocol.
//! Uses a long-lived reqwest::Client for connection pooling.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use super::{ChatMessage, ChatModel, GenerationParams};
use crate::error::RagError;
use crate::memory::MessageRole;
use crate::Result;

const REFERER: &str = "https://github.com/notnbhd/mymoney";
const APP_TITLE: &str = "MyMoney App";

/// Reusable OpenRouter client (connection-pooled)
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenRouterClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatModel for OpenRouterClient {
    async fn complete(&self, messages: &[ChatMessage], params: &GenerationParams) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(RagError::Llm("OPENROUTER_API_TOKEN not configured".to_string()));
        }

        let url = format!("{}/chat/completions", self.base_url);

        let request = CompletionRequest {
            model: &self.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        info!(model = %self.model, messages = messages.len(), "Calling OpenRouter API");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", REFERER)
            .header("X-Title", APP_TITLE)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("OpenRouter API request failed: {}", e);
                RagError::Llm(format!("OpenRouter API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("OpenRouter API error response: {}", error_text);
            return Err(RagError::Llm(format!(
                "OpenRouter API error (HTTP {}): {}",
                status, error_text
            )));
        }

        let completion: CompletionResponse = response.json().await.map_err(|e| {
            error!("Failed to parse OpenRouter response: {}", e);
            RagError::Llm(format!("OpenRouter parse error: {}", e))
        })?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| RagError::Llm("Empty response from OpenRouter".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        let role = match message.role {
            MessageRole::System => "system",
            MessageRole::Human => "user",
            MessageRole::Assistant => "assistant",
        };
        Self {
            role,
            content: &message.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn messages() -> Vec<ChatMessage> {
        vec![
            ChatMessage::system("Bạn là trợ lý tài chính"),
            ChatMessage::human("Tôi nên tiết kiệm bao nhiêu?"),
            ChatMessage::assistant("Khoảng 20% thu nhập."),
            ChatMessage::human("Còn quỹ khẩn cấp?"),
        ]
    }

    #[test]
    fn test_request_serialization() {
        let msgs = messages();
        let request = CompletionRequest {
            model: "mistralai/devstral-2512:free",
            messages: msgs.iter().map(WireMessage::from).collect(),
            temperature: 0.7,
            max_tokens: 500,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][2]["role"], "assistant");
        assert_eq!(json["max_tokens"], 500);
    }

    #[tokio::test]
    async fn test_missing_token_fails_without_network() {
        let client = OpenRouterClient::new(
            String::new(),
            "m".into(),
            "http://127.0.0.1:9".into(),
        )
        .unwrap();

        let err = client
            .complete(&messages(), &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Llm(_)));
    }

    #[tokio::test]
    async fn test_completion_text_returned() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(header("X-Title", APP_TITLE))
            .and(body_partial_json(serde_json::json!({"model": "test-model"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "  Hãy lập quỹ khẩn cấp.  "}}]
            })))
            .mount(&server)
            .await;

        let client = OpenRouterClient::new(
            "sk-test".into(),
            "test-model".into(),
            format!("{}/api/v1/", server.uri()),
        )
        .unwrap();

        let text = client
            .complete(&messages(), &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(text, "  Hãy lập quỹ khẩn cấp.  ");
    }

    #[tokio::test]
    async fn test_quota_error_is_llm_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let client = OpenRouterClient::new("sk-test".into(), "m".into(), server.uri()).unwrap();
        let err = client
            .complete(&messages(), &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn test_empty_choices_is_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let client = OpenRouterClient::new("sk-test".into(), "m".into(), server.uri()).unwrap();
        assert!(client
            .complete(&messages(), &GenerationParams::default())
            .await
            .is_err());
    }
}
