//! Error types for the Concierge domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each external collaborator has its own error type so the pipeline can
//! tell a flaky dependency apart from a deterministic refusal.

use thiserror::Error;

/// The top-level error type for Concierge operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Channel errors ---
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    // --- Directory errors ---
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },
}

// --- Collaborator errors ---

/// Failures reported by a model-completion backend.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Content rejected by provider policy: {0}")]
    ContentRejected(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Timeouts, rate limits, network failures and 5xx/408 responses are
    /// transient. Everything else is a property of the request or the
    /// credentials and will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500 || *status_code == 408,
            Self::AuthenticationFailed(_)
            | Self::InvalidRequest(_)
            | Self::ContentRejected(_)
            | Self::ModelNotFound(_)
            | Self::InvalidResponse(_)
            | Self::NotConfigured(_) => false,
        }
    }

    /// Server-suggested delay before the next attempt, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed to {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("Channel connection lost: {0}")]
    ConnectionLost(String),

    #[error("Invalid update payload: {0}")]
    InvalidPayload(String),
}

/// Failures reported by the authorization directory.
///
/// `Clone` because one in-flight lookup result is shared by every caller
/// waiting on the same identity.
#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    /// The directory could not be reached or answered with an error.
    /// Never cached; the caller decides whether to fail closed.
    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    #[error("Directory returned an unreadable response: {0}")]
    InvalidResponse(String),

    #[error("Directory not configured: {0}")]
    NotConfigured(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn transient_provider_errors_are_retryable() {
        assert!(ProviderError::Timeout("slow".into()).is_retryable());
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(ProviderError::RateLimited { retry_after_secs: 3 }.is_retryable());
        assert!(
            ProviderError::ApiError {
                status_code: 503,
                message: "overloaded".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn fatal_provider_errors_are_not_retryable() {
        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_retryable());
        assert!(!ProviderError::ContentRejected("policy".into()).is_retryable());
        assert!(!ProviderError::InvalidRequest("bad json".into()).is_retryable());
        assert!(
            !ProviderError::ApiError {
                status_code: 404,
                message: "missing".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn retry_after_only_for_rate_limits() {
        assert_eq!(
            ProviderError::RateLimited { retry_after_secs: 7 }.retry_after_secs(),
            Some(7)
        );
        assert_eq!(ProviderError::Timeout("x".into()).retry_after_secs(), None);
    }

    #[test]
    fn directory_error_wraps_into_top_level() {
        let err: Error = DirectoryError::Unavailable("notion down".into()).into();
        assert!(err.to_string().contains("notion down"));
    }
}
