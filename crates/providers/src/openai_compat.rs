//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any
//! endpoint exposing `/chat/completions`.
//!
//! Each call is a single attempt. HTTP statuses are mapped onto
//! [`ProviderError`] variants so the completion client can tell transient
//! failures from fatal ones.

use async_trait::async_trait;
use concierge_core::error::ProviderError;
use concierge_core::message::Role;
use concierge_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Used when a 429 carries no usable `Retry-After` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        // The completion client enforces the per-attempt timeout; this one
        // only guards against a connection that never closes.
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// System prompt first, then the turns in order.
    fn to_api_messages(request: &CompletionRequest) -> Vec<ApiMessage> {
        std::iter::once(ApiMessage {
            role: "system".into(),
            content: Some(request.system_prompt.clone()),
        })
        .chain(request.turns.iter().map(|t| ApiMessage {
            role: match t.role {
                Role::User => "user".into(),
                Role::Assistant => "assistant".into(),
            },
            content: Some(t.text.clone()),
        }))
        .collect()
    }

    fn request_body(request: &CompletionRequest) -> serde_json::Value {
        serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(request),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": false,
        })
    }
}

/// Map a non-success HTTP status onto a provider error.
fn classify_status(status: u16, retry_after: Option<u64>, body: &str) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        401 | 403 => {
            ProviderError::AuthenticationFailed("Invalid API key or insufficient permissions".into())
        }
        404 => ProviderError::ModelNotFound(api_error_message(body)),
        408 => ProviderError::Timeout("Provider returned 408 Request Timeout".into()),
        400..=499 if is_policy_rejection(body) => ProviderError::ContentRejected(api_error_message(body)),
        400..=499 => ProviderError::InvalidRequest(format!("{status}: {}", api_error_message(body))),
        _ => ProviderError::ApiError {
            status_code: status,
            message: api_error_message(body),
        },
    }
}

/// Integer-seconds `Retry-After` only; HTTP-date values are ignored.
fn parse_retry_after(value: &str) -> Option<u64> {
    value.trim().parse().ok()
}

fn is_policy_rejection(body: &str) -> bool {
    body.contains("content_policy") || body.contains("content_filter")
}

/// Pull `error.message` out of an OpenAI error body, or fall back to the raw text.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.chars().take(500).collect())
}

fn map_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

#[async_trait]
impl concierge_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            provider = %self.name,
            model = %request.model,
            turns = request.turns.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status().as_u16();

        if !(200..300).contains(&status) {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(classify_status(status, retry_after, &error_body));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        parse_response(api_response)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(map_transport_error)?;

        Ok(response.status().is_success())
    }
}

/// Turn a decoded API response into a completion, rejecting empty output.
fn parse_response(api_response: ApiResponse) -> std::result::Result<CompletionResponse, ProviderError> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".into()))?;

    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(ProviderError::ContentRejected(
            "Completion withheld by content filter".into(),
        ));
    }

    let text = choice.message.content.unwrap_or_default();
    if text.trim().is_empty() {
        return Err(ProviderError::InvalidResponse("Empty completion text".into()));
    }

    let usage = api_response.usage.map(|u| Usage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });

    Ok(CompletionResponse {
        text: text.trim().to_string(),
        usage,
        model: api_response.model,
        attempts: 1,
    })
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::message::ConversationTurn;
    use concierge_core::Provider;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".into(),
            system_prompt: "You are helpful".into(),
            turns: vec![
                ConversationTurn::user("hi"),
                ConversationTurn::assistant("Hello!"),
                ConversationTurn::user("how are you?"),
            ],
            max_tokens: 500,
            temperature: 0.7,
        }
    }

    #[test]
    fn trailing_slash_trimmed() {
        let provider = OpenAiCompatProvider::new("x", "https://host/v1/", "k");
        assert_eq!(provider.base_url, "https://host/v1");
    }

    #[test]
    fn message_conversion_puts_system_first() {
        let api_messages = OpenAiCompatProvider::to_api_messages(&request());
        let roles: Vec<&str> = api_messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(api_messages[0].content.as_deref(), Some("You are helpful"));
    }

    #[test]
    fn request_body_carries_limits() {
        let body = OpenAiCompatProvider::request_body(&request());
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 500);
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(429, Some(12), ""),
            ProviderError::RateLimited { retry_after_secs: 12 }
        ));
        assert!(matches!(
            classify_status(429, None, ""),
            ProviderError::RateLimited { retry_after_secs: DEFAULT_RETRY_AFTER_SECS }
        ));
        assert!(matches!(classify_status(401, None, ""), ProviderError::AuthenticationFailed(_)));
        assert!(matches!(classify_status(404, None, ""), ProviderError::ModelNotFound(_)));
        assert!(matches!(classify_status(408, None, ""), ProviderError::Timeout(_)));
        assert!(matches!(classify_status(422, None, "bad"), ProviderError::InvalidRequest(_)));
        assert!(matches!(
            classify_status(503, None, "overloaded"),
            ProviderError::ApiError { status_code: 503, .. }
        ));
    }

    #[test]
    fn policy_rejection_detected() {
        let body = r#"{"error":{"message":"flagged","type":"invalid_request_error","code":"content_policy_violation"}}"#;
        match classify_status(400, None, body) {
            ProviderError::ContentRejected(msg) => assert_eq!(msg, "flagged"),
            other => panic!("expected ContentRejected, got {other:?}"),
        }
    }

    #[test]
    fn retry_after_parsing() {
        assert_eq!(parse_retry_after(" 30 "), Some(30));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn parse_successful_response() {
        let json = r#"{
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{ "message": { "role": "assistant", "content": " Hello! " }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 20, "completion_tokens": 3, "total_tokens": 23 }
        }"#;
        let resp = parse_response(serde_json::from_str(json).unwrap()).unwrap();
        assert_eq!(resp.text, "Hello!");
        assert_eq!(resp.model, "gpt-4o-mini-2024-07-18");
        assert_eq!(resp.usage.unwrap().total_tokens, 23);
        assert_eq!(resp.attempts, 1);
    }

    #[test]
    fn empty_completion_is_invalid() {
        let json = r#"{"model":"m","choices":[{"message":{"role":"assistant","content":"  "}}]}"#;
        assert!(matches!(
            parse_response(serde_json::from_str(json).unwrap()),
            Err(ProviderError::InvalidResponse(_))
        ));

        let json = r#"{"model":"m","choices":[]}"#;
        assert!(matches!(
            parse_response(serde_json::from_str(json).unwrap()),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn content_filter_finish_is_rejection() {
        let json = r#"{"model":"m","choices":[{"message":{"role":"assistant","content":"partial"},"finish_reason":"content_filter"}]}"#;
        assert!(matches!(
            parse_response(serde_json::from_str(json).unwrap()),
            Err(ProviderError::ContentRejected(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let provider = OpenAiCompatProvider::new("local", "http://127.0.0.1:1/v1", "k");
        let err = provider.complete(&request()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
