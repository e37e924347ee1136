use thiserror::Error;

/// Errors returned by a [`MarketDataProvider`](super::MarketDataProvider).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider answered 429. Retryable after the given interval.
    #[error("rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Network failure, timeout, 5xx or an undecodable body. Retryable.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Every attempt failed; `cause` is the error of the last attempt.
    #[error("giving up after {attempts} attempts: {cause}")]
    Exhausted {
        attempts: u32,
        cause: Box<ProviderError>,
    },

    /// A non-retryable error response (4xx other than 429).
    #[error("provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// The request was rejected before reaching the provider.
    #[error("invalid request: {0}")]
    Validation(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }

    /// The innermost error, looking through [`ProviderError::Exhausted`].
    pub fn root_cause(&self) -> &ProviderError {
        match self {
            Self::Exhausted { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Transient(format!("request timed out: {}", e))
        } else if e.is_decode() {
            Self::Transient(format!("failed to decode response: {}", e))
        } else {
            Self::Transient(e.to_string())
        }
    }
}
