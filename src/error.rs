//! Error taxonomy for the consensus engine.
//!
//! Every fallible boundary in this crate returns one of the variants below.
//! Provider-side failures are nested under [`ProviderError`] so retry policy
//! can dispatch on retryability without inspecting strings.

use std::time::Duration;

/// Top-level error for any consensus, voting, or decomposition operation.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("insufficient models: {0}")]
    InsufficientModels(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(#[from] crate::phase::TransitionError),

    #[error("{0}")]
    Protocol(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("provider quota exceeded for {provider_id}: limit {rate_limit} requests/60s")]
    ProviderQuotaExceeded { provider_id: String, rate_limit: u32 },

    #[error("cost limit exceeded: would reach {attempted:.4}, hard limit is {limit:.4}")]
    CostLimitExceeded { attempted: f64, limit: f64 },

    #[error("could not extract JSON from model response: {0}")]
    JsonExtraction(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("deliberation cancelled")]
    Cancelled,
}

impl ConsensusError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn insufficient_models(msg: impl Into<String>) -> Self {
        Self::InsufficientModels(msg.into())
    }
}

/// Errors raised by a provider capability implementation.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("authentication failed for provider {0}")]
    Auth(String),

    #[error("rate limited by provider {provider_id}, retry after {retry_after:?}")]
    RateLimit {
        provider_id: String,
        retry_after: Option<Duration>,
    },

    #[error("provider {0} timed out")]
    Timeout(String),

    #[error("provider {0} is overloaded")]
    Overloaded(String),

    #[error("model {model_id} not found on provider {provider_id}")]
    ModelNotFound { provider_id: String, model_id: String },

    #[error("provider {0} returned a malformed response: {1}")]
    Malformed(String, String),

    #[error("provider {0} failed: {1}")]
    Other(String, String),
}

impl ProviderError {
    /// Whether this class of failure is worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit { .. } | Self::Timeout(_) | Self::Overloaded(_)
        )
    }
}

pub type ConsensusResult<T> = Result<T, ConsensusError>;
