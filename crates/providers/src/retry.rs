//! Completion client: bounded retry with per-attempt timeout and backoff.
//!
//! Wraps a single-shot [`Provider`]. Each attempt runs under the request
//! timeout. Transient failures (timeout, rate limit, network, 5xx/408) are
//! retried after an exponential delay; anything else is returned at once.
//! The loop never runs more than `max_attempts` times and always ends in a
//! typed [`CompletionResult`].

use concierge_core::error::ProviderError;
use concierge_core::provider::{
    CompletionFailure, CompletionRequest, CompletionResult, FailureKind, Provider,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Retry and timeout settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub request_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            request_timeout: Duration::from_secs(60),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &concierge_config::CompletionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Delay before the attempt after `attempt` (1-based) failed.
    ///
    /// `base * 2^(attempt-1)`, capped at `backoff_max`. A server-supplied
    /// retry-after replaces the computed delay when longer, still capped.
    pub fn delay_after(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let computed = self
            .backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max);
        match retry_after {
            Some(hint) => hint.max(computed).min(self.backoff_max),
            None => computed,
        }
    }
}

/// The retrying front of a provider.
pub struct CompletionClient {
    provider: Arc<dyn Provider>,
    policy: RetryPolicy,
}

impl CompletionClient {
    pub fn new(provider: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn health_check(&self) -> Result<bool, ProviderError> {
        self.provider.health_check().await
    }

    /// Obtain a completion, retrying transient failures.
    pub async fn complete(&self, request: &CompletionRequest) -> CompletionResult {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let outcome = match tokio::time::timeout(
                self.policy.request_timeout,
                self.provider.complete(request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "'{}' did not answer within {}s",
                    self.provider.name(),
                    self.policy.request_timeout.as_secs()
                ))),
            };

            let error = match outcome {
                Ok(mut response) => {
                    response.attempts = attempt;
                    info!(
                        provider = %self.provider.name(),
                        model = %response.model,
                        attempt,
                        "Completion succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                warn!(
                    provider = %self.provider.name(),
                    attempt,
                    error = %error,
                    "Completion failed, not retrying"
                );
                return Err(CompletionFailure {
                    kind: FailureKind::Fatal,
                    attempts: attempt,
                    error,
                });
            }

            if attempt >= max_attempts {
                warn!(
                    provider = %self.provider.name(),
                    attempts = attempt,
                    error = %error,
                    "Completion retries exhausted"
                );
                return Err(CompletionFailure {
                    kind: FailureKind::Transient,
                    attempts: attempt,
                    error,
                });
            }

            let delay = self
                .policy
                .delay_after(attempt, error.retry_after_secs().map(Duration::from_secs));
            warn!(
                provider = %self.provider.name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient completion failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use concierge_core::message::ConversationTurn;
    use concierge_core::provider::CompletionResponse;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Plays back a script of outcomes; `None` means hang forever.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Option<Result<String, ProviderError>>>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Option<Result<String, ProviderError>>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Some(Ok(text))) => Ok(CompletionResponse {
                    text,
                    usage: None,
                    model: "scripted-model".into(),
                    attempts: 1,
                }),
                Some(Some(Err(e))) => Err(e),
                Some(None) | None => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ProviderError::Network("unreachable".into()))
                }
            }
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "m".into(),
            system_prompt: "sys".into(),
            turns: vec![ConversationTurn::user("hi")],
            max_tokens: 100,
            temperature: 0.7,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            request_timeout: Duration::from_secs(5),
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(2),
        }
    }

    fn client(provider: Arc<ScriptedProvider>) -> CompletionClient {
        CompletionClient::new(provider, policy())
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.delay_after(1, None), Duration::from_millis(100));
        assert_eq!(p.delay_after(2, None), Duration::from_millis(200));
        assert_eq!(p.delay_after(3, None), Duration::from_millis(400));
        assert_eq!(p.delay_after(10, None), Duration::from_secs(2));
        assert_eq!(p.delay_after(u32::MAX, None), Duration::from_secs(2));
    }

    #[test]
    fn retry_after_honored_up_to_cap() {
        let p = policy();
        assert_eq!(p.delay_after(1, Some(Duration::from_secs(1))), Duration::from_secs(1));
        assert_eq!(p.delay_after(1, Some(Duration::from_secs(60))), Duration::from_secs(2));
        // Shorter hint than computed backoff: keep the backoff
        assert_eq!(p.delay_after(3, Some(Duration::from_millis(10))), Duration::from_millis(400));
    }

    #[test]
    fn policy_from_config() {
        let p = RetryPolicy::from_config(&concierge_config::CompletionConfig::default());
        assert_eq!(p, RetryPolicy::default());
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_success() {
        let provider = Arc::new(ScriptedProvider::new(vec![Some(Ok("Hello!".into()))]));
        let resp = client(provider.clone()).complete(&request()).await.unwrap();
        assert_eq!(resp.text, "Hello!");
        assert_eq!(resp.attempts, 1);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Some(Err(ProviderError::ApiError {
                status_code: 502,
                message: "bad gateway".into(),
            })),
            Some(Err(ProviderError::RateLimited { retry_after_secs: 1 })),
            Some(Ok("finally".into())),
        ]));
        let resp = client(provider.clone()).complete(&request()).await.unwrap();
        assert_eq!(resp.text, "finally");
        assert_eq!(resp.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Some(Err(ProviderError::AuthenticationFailed("bad key".into()))),
            Some(Ok("never".into())),
        ]));
        let failure = client(provider.clone()).complete(&request()).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Fatal);
        assert_eq!(failure.attempts, 1);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_completion_is_fatal() {
        let provider = Arc::new(ScriptedProvider::new(vec![Some(Err(
            ProviderError::InvalidResponse("Empty completion text".into()),
        ))]));
        let failure = client(provider).complete(&request()).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Fatal);
    }

    #[tokio::test(start_paused = true)]
    async fn all_attempts_time_out() {
        let provider = Arc::new(ScriptedProvider::new(vec![None, None, None]));
        let started = tokio::time::Instant::now();
        let failure = client(provider.clone()).complete(&request()).await.unwrap_err();

        assert_eq!(failure.kind, FailureKind::Transient);
        assert_eq!(failure.attempts, 3);
        assert!(matches!(failure.error, ProviderError::Timeout(_)));
        assert_eq!(provider.calls(), 3);
        // 3 timeouts of 5s plus backoff of 100ms and 200ms
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(15_300), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(15_400), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_policy_never_sleeps() {
        let provider = Arc::new(ScriptedProvider::new(vec![Some(Err(ProviderError::Network(
            "reset".into(),
        )))]));
        let client = CompletionClient::new(
            provider.clone(),
            RetryPolicy {
                max_attempts: 1,
                ..policy()
            },
        );
        let failure = client.complete(&request()).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Transient);
        assert_eq!(failure.attempts, 1);
        assert_eq!(provider.calls(), 1);
    }
}
