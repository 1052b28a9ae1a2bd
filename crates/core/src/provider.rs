//! Provider trait: the abstraction over model-completion backends.
//!
//! A Provider knows how to send one assembled request to a language model
//! and return the completion. Retry, timeout and backoff live one layer up,
//! in the completion client, so providers stay single-shot.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::ConversationTurn;

/// A complete model request: persona first, then the ordered turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// Fixed system prompt, always sent first and never truncated
    pub system_prompt: String,

    /// Chronological history plus the new user turn (last)
    pub turns: Vec<ConversationTurn>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    0.7
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A successful completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// The generated text
    pub text: String,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// How many attempts it took (1 when the first call succeeded)
    #[serde(default = "default_attempts")]
    pub attempts: u32,
}

fn default_attempts() -> u32 {
    1
}

/// How a completion failure should be treated by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeout, rate limit or server error that survived every retry
    Transient,
    /// Invalid request, credentials or policy rejection; never retried
    Fatal,
}

/// A completion that did not produce text.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?} completion failure after {attempts} attempt(s): {error}")]
pub struct CompletionFailure {
    pub kind: FailureKind,
    pub attempts: u32,
    pub error: ProviderError,
}

/// Outcome of a completion call. Carries either the text or the failure kind.
pub type CompletionResult = std::result::Result<CompletionResponse, CompletionFailure>;

/// The core Provider trait.
///
/// Every model backend implements this trait. The pipeline never talks to a
/// provider directly; it goes through the retrying completion client.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response (single attempt).
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError>;

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_request_equality_is_structural() {
        let turn = ConversationTurn::user("hi");
        let a = CompletionRequest {
            model: "gpt-4o-mini".into(),
            system_prompt: "be kind".into(),
            turns: vec![turn.clone()],
            max_tokens: 500,
            temperature: default_temperature(),
        };
        let b = a.clone();
        assert_eq!(a, b);
    }

    #[test]
    fn failure_display_mentions_attempts() {
        let failure = CompletionFailure {
            kind: FailureKind::Transient,
            attempts: 3,
            error: ProviderError::Timeout("60s".into()),
        };
        let text = failure.to_string();
        assert!(text.contains("Transient"));
        assert!(text.contains("3 attempt"));
    }

    #[test]
    fn response_defaults_to_single_attempt() {
        let json = r#"{"text":"hello","usage":null,"model":"m"}"#;
        let resp: CompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.attempts, 1);
    }
}
