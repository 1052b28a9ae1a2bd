//! Model-completion providers for Concierge.
//!
//! All providers implement the `concierge_core::Provider` trait and make a
//! single attempt per call. [`CompletionClient`] adds timeout, retry and
//! backoff on top.

pub mod openai_compat;
pub mod retry;

pub use openai_compat::OpenAiCompatProvider;
pub use retry::{CompletionClient, RetryPolicy};

use concierge_config::AppConfig;
use concierge_core::error::ProviderError;
use std::sync::Arc;

/// Build the retrying completion client from configuration.
pub fn build_from_config(config: &AppConfig) -> Result<CompletionClient, ProviderError> {
    let api_key = config
        .api_key
        .clone()
        .ok_or_else(|| ProviderError::NotConfigured("OPENAI_API_KEY is not set".into()))?;

    let provider = Arc::new(OpenAiCompatProvider::new(
        provider_name(&config.api_url),
        &config.api_url,
        api_key,
    ));

    Ok(CompletionClient::new(
        provider,
        RetryPolicy::from_config(&config.completion),
    ))
}

/// A short provider label derived from the base URL, for logs.
fn provider_name(api_url: &str) -> &'static str {
    if api_url.contains("api.openai.com") {
        "openai"
    } else if api_url.contains("openrouter.ai") {
        "openrouter"
    } else if api_url.contains("localhost:11434") {
        "ollama"
    } else {
        "openai-compatible"
    }
}
