//! LLM capability and provider implementations.
//!
//! The capability follows the same contract as every other connector:
//! operations fail with [`ConnectorError`] and transient failures are
//! retried with exponential backoff via [`generate_with_retry`].

pub mod openai_compat;

use crate::connector::{with_backoff, ConnectorError};

/// Token usage information from an LLM completion.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the input/prompt.
    pub input_tokens: u32,
    /// Number of tokens in the output/completion.
    pub output_tokens: u32,
}

/// Response from an LLM completion request.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// The generated text content.
    pub text: String,
    /// Token usage for this completion.
    pub usage: TokenUsage,
    /// The model that produced this response.
    pub model: String,
}

/// Parameters controlling LLM generation behavior.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Maximum number of tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 = deterministic, 1.0+ = creative).
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 800,
            temperature: 0.7,
        }
    }
}

/// LLM provider capability.
///
/// Object-safe for use as `Arc<dyn LlmConnector>` in the registry.
#[async_trait::async_trait]
pub trait LlmConnector: Send + Sync {
    /// Display name of this provider (e.g. "openai", "sandbox").
    fn name(&self) -> &str;

    /// Generate text from a system prompt and user message.
    async fn generate(
        &self,
        system: &str,
        user_message: &str,
        params: &GenerationParams,
    ) -> Result<LlmResponse, ConnectorError>;

    /// Summarize a block of text.
    async fn summarize(
        &self,
        text: &str,
        params: &GenerationParams,
    ) -> Result<LlmResponse, ConnectorError> {
        self.generate(
            "Summarize the following text in at most three sentences. \
             Keep names, companies, and commitments.",
            text,
            params,
        )
        .await
    }

    /// Check if the provider is reachable and configured correctly.
    async fn health_check(&self) -> Result<(), ConnectorError> {
        self.generate(
            "You are a test assistant.",
            "Say OK",
            &GenerationParams {
                max_tokens: 10,
                ..Default::default()
            },
        )
        .await?;
        Ok(())
    }
}

/// Generate with the standard connector retry policy.
pub async fn generate_with_retry(
    llm: &dyn LlmConnector,
    system: &str,
    user_message: &str,
    params: &GenerationParams,
) -> Result<LlmResponse, ConnectorError> {
    with_backoff(|| llm.generate(system, user_message, params)).await
}
