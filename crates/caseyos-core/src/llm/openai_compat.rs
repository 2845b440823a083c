//! OpenAI-compatible LLM provider.
//!
//! Works with OpenAI (cloud) and any local endpoint sharing the chat
//! completions request/response format.

use serde::{Deserialize, Serialize};

use super::{GenerationParams, LlmConnector, LlmResponse, TokenUsage};
use crate::config::LlmConfig;
use crate::connector::{ConnectorError, ConnectorErrorKind};

/// An LLM provider using the OpenAI chat completions API format.
pub struct OpenAiCompatConnector {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatConnector {
    /// Create a provider from config.
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    fn error(
        operation: &'static str,
        kind: ConnectorErrorKind,
        message: impl Into<String>,
    ) -> ConnectorError {
        ConnectorError::new("llm", operation, kind, message)
    }
}

#[async_trait::async_trait]
impl LlmConnector for OpenAiCompatConnector {
    fn name(&self) -> &str {
        "openai_compat"
    }

    async fn generate(
        &self,
        system: &str,
        user_message: &str,
        params: &GenerationParams,
    ) -> Result<LlmResponse, ConnectorError> {
        tracing::debug!(
            model = %self.model,
            max_tokens = params.max_tokens,
            "LLM request",
        );

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user_message,
                },
            ],
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::error("generate", ConnectorErrorKind::Transient, e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            if status == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                let mut err =
                    Self::error("generate", ConnectorErrorKind::RateLimited, "rate limited");
                err.retry_after = retry_after;
                return Err(err);
            }
            if status == 401 || status == 403 {
                return Err(Self::error(
                    "generate",
                    ConnectorErrorKind::AuthExpired,
                    format!("HTTP {status}"),
                ));
            }

            let body = response.text().await.unwrap_or_default();
            let kind = if status >= 500 {
                ConnectorErrorKind::Transient
            } else {
                ConnectorErrorKind::Permanent
            };
            return Err(Self::error(
                "generate",
                kind,
                format!("HTTP {status}: {body}"),
            ));
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|e| {
            Self::error(
                "generate",
                ConnectorErrorKind::Permanent,
                format!("failed to parse response: {e}"),
            )
        })?;

        let text = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        let usage = body.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            input_tokens: u.prompt_tokens.unwrap_or(0),
            output_tokens: u.completion_tokens.unwrap_or(0),
        });

        tracing::debug!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            chars = text.len(),
            "LLM response",
        );

        Ok(LlmResponse {
            text,
            usage,
            model: body.model,
        })
    }
}

// --- Internal Serde types ---

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String) -> LlmConfig {
        LlmConfig {
            base_url,
            api_key: "test-key".to_string(),
            model: "test-model".to_string(),
            max_tokens: 100,
            temperature: 0.5,
        }
    }

    #[tokio::test]
    async fn generate_parses_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "test-model",
                "choices": [{"message": {"role": "assistant", "content": "Hello Ann"}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3}
            })))
            .mount(&server)
            .await;

        let llm = OpenAiCompatConnector::new(&config(server.uri()));
        let response = llm
            .generate("system", "user", &GenerationParams::default())
            .await
            .expect("generate");

        assert_eq!(response.text, "Hello Ann");
        assert_eq!(response.usage.input_tokens, 12);
        assert_eq!(response.model, "test-model");
    }

    #[tokio::test]
    async fn rate_limit_maps_to_rate_limited_with_hint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "30"))
            .mount(&server)
            .await;

        let llm = OpenAiCompatConnector::new(&config(server.uri()));
        let err = llm
            .generate("system", "user", &GenerationParams::default())
            .await
            .expect_err("should be rate limited");

        assert_eq!(err.kind, ConnectorErrorKind::RateLimited);
        assert_eq!(err.retry_after, Some(30));
    }

    #[tokio::test]
    async fn auth_failure_maps_to_auth_expired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let llm = OpenAiCompatConnector::new(&config(server.uri()));
        let err = llm
            .generate("system", "user", &GenerationParams::default())
            .await
            .expect_err("should fail auth");

        assert_eq!(err.kind, ConnectorErrorKind::AuthExpired);
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let llm = OpenAiCompatConnector::new(&config(server.uri()));
        let err = llm
            .generate("system", "user", &GenerationParams::default())
            .await
            .expect_err("should fail");

        assert_eq!(err.kind, ConnectorErrorKind::Transient);
    }

    #[tokio::test]
    async fn client_error_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
            .mount(&server)
            .await;

        let llm = OpenAiCompatConnector::new(&config(server.uri()));
        let err = llm
            .generate("system", "user", &GenerationParams::default())
            .await
            .expect_err("should fail");

        assert_eq!(err.kind, ConnectorErrorKind::Permanent);
        assert!(err.message.contains("bad model"));
    }
}
