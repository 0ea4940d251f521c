//! Provider error types with retry classification.
//!
//! Distinguishes between transient errors (the pool should retry or fail over)
//! and permanent errors (the pool should move on immediately).

use std::time::Duration;

/// Error from a single provider call.
#[derive(Debug, Clone)]
pub struct ProviderError {
    /// The kind of error
    pub kind: ProviderErrorKind,
    /// HTTP status code, if applicable
    pub status_code: Option<u16>,
    /// Error message
    pub message: String,
    /// Suggested retry delay (from Retry-After header, when present)
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Timeout,
            status_code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create a rate limit error.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: ProviderErrorKind::RateLimited,
            status_code: Some(429),
            message: message.into(),
            retry_after,
        }
    }

    /// Create an unavailable error (5xx, connection refused, DNS failure).
    pub fn unavailable(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Unavailable,
            status_code,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create a bad-response error (4xx, malformed body, empty completion).
    pub fn bad_response(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::BadResponse,
            status_code,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Check if this error is transient and worth retrying on the same provider.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Get the suggested delay before the next attempt.
    ///
    /// Returns `retry_after` if the provider supplied one, otherwise an
    /// exponential backoff based on the error kind, capped at 60 seconds.
    pub fn suggested_delay(&self, attempt: u32) -> Duration {
        if let Some(retry_after) = self.retry_after {
            return retry_after;
        }

        let base_delay = match self.kind {
            ProviderErrorKind::RateLimited => Duration::from_secs(5),
            ProviderErrorKind::Unavailable => Duration::from_secs(2),
            ProviderErrorKind::Timeout => Duration::from_secs(1),
            ProviderErrorKind::BadResponse => Duration::from_secs(1),
        };

        // Exponential backoff: base * 2^attempt
        let multiplier = 2u64.saturating_pow(attempt);
        let delay_secs = base_delay.as_secs().saturating_mul(multiplier);

        // Deterministic jitter (up to 25% of the delay) keyed on attempt number
        let jitter_range = delay_secs / 4;
        let jitter = if jitter_range > 0 {
            (attempt as u64 * 7) % jitter_range
        } else {
            0
        };

        Duration::from_secs((delay_secs + jitter).min(60))
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Classification of provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The call exceeded its configured timeout - transient, retry
    Timeout,
    /// Rate limited (429) - transient, retry with backoff
    RateLimited,
    /// Back-end unreachable or erroring (5xx, connect failure) - transient, retry
    Unavailable,
    /// The back-end answered but the answer is unusable (4xx, malformed body).
    /// Permanent for this provider; fail over instead of retrying.
    BadResponse,
}

impl ProviderErrorKind {
    /// Check if this error kind is transient (worth retrying on the same provider).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderErrorKind::Timeout
                | ProviderErrorKind::RateLimited
                | ProviderErrorKind::Unavailable
        )
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderErrorKind::Timeout => write!(f, "Timeout"),
            ProviderErrorKind::RateLimited => write!(f, "Rate limited"),
            ProviderErrorKind::Unavailable => write!(f, "Unavailable"),
            ProviderErrorKind::BadResponse => write!(f, "Bad response"),
        }
    }
}

/// Classify an HTTP status code into an error kind.
pub fn classify_http_status(status: u16) -> ProviderErrorKind {
    match status {
        429 => ProviderErrorKind::RateLimited,
        500 | 502 | 503 | 504 => ProviderErrorKind::Unavailable,
        400..=499 => ProviderErrorKind::BadResponse,
        _ => ProviderErrorKind::Unavailable,
    }
}

/// One provider's final error during a pool execution.
#[derive(Debug, Clone)]
pub struct ProviderFailure {
    /// Which provider failed.
    pub provider_id: String,
    /// The last error observed from it.
    pub error: ProviderError,
}

/// Error from a pool execution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("no providers configured for capability '{0}'")]
    NoProvidersForTag(String),

    #[error("all providers exhausted for capability '{tag}' ({} tried)", failures.len())]
    AllProvidersExhausted {
        tag: String,
        failures: Vec<ProviderFailure>,
    },
}

impl PoolError {
    /// Render the per-provider failure detail for diagnostics.
    pub fn detail(&self) -> String {
        match self {
            PoolError::NoProvidersForTag(tag) => {
                format!("no providers configured for capability '{}'", tag)
            }
            PoolError::AllProvidersExhausted { failures, .. } => failures
                .iter()
                .map(|f| format!("{}: {}", f.provider_id, f.error))
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderErrorKind::Timeout.is_retryable());
        assert!(ProviderErrorKind::RateLimited.is_retryable());
        assert!(ProviderErrorKind::Unavailable.is_retryable());
        assert!(!ProviderErrorKind::BadResponse.is_retryable());
    }

    #[test]
    fn test_http_status_classification() {
        assert_eq!(classify_http_status(429), ProviderErrorKind::RateLimited);
        assert_eq!(classify_http_status(500), ProviderErrorKind::Unavailable);
        assert_eq!(classify_http_status(503), ProviderErrorKind::Unavailable);
        assert_eq!(classify_http_status(400), ProviderErrorKind::BadResponse);
        assert_eq!(classify_http_status(401), ProviderErrorKind::BadResponse);
    }

    #[test]
    fn test_exponential_backoff() {
        let error = ProviderError::rate_limited("test", None);

        let delay_0 = error.suggested_delay(0);
        let delay_1 = error.suggested_delay(1);
        let delay_2 = error.suggested_delay(2);

        assert!(delay_1 > delay_0);
        assert!(delay_2 > delay_1);

        // Capped
        let delay_10 = error.suggested_delay(10);
        assert!(delay_10.as_secs() <= 60);
    }

    #[test]
    fn test_retry_after_respected() {
        let error = ProviderError::rate_limited("test", Some(Duration::from_secs(30)));

        assert_eq!(error.suggested_delay(0), Duration::from_secs(30));
        assert_eq!(error.suggested_delay(5), Duration::from_secs(30));
    }
}
