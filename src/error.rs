//! Error types for the relay.

use crate::api::Provider;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GenerationError>;

/// Message shown to end users when every candidate failed because of rate
/// limiting or quota pressure.
pub const RATE_LIMITED_USER_MESSAGE: &str =
    "The model is temporarily unavailable due to high demand. Please try again shortly.";

/// Retry classification of a failed upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Worth retrying in place, then falling back.
    Transient,
    /// Never retried; the next candidate may still succeed.
    Fatal,
}

/// Unified error type covering validation, upstream, and orchestration
/// failures.
///
/// Adapters translate every provider-specific failure into either
/// [`TransientUpstream`](Self::TransientUpstream) or
/// [`FatalUpstream`](Self::FatalUpstream); raw transport errors never escape
/// an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// The request names an unknown provider/model or is otherwise malformed.
    /// Never retried and never triggers fallback.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The provider does not support the requested operation.
    #[error("Capability error: {0}")]
    Capability(String),

    /// Rate limit, quota exhaustion, timeout, or 5xx from the upstream.
    #[error("{provider} transient error: {message}")]
    TransientUpstream {
        provider: Provider,
        message: String,
        /// `true` when the failure came from rate limiting or quota pressure.
        rate_limited: bool,
    },

    /// Bad request, invalid model, or authentication failure.
    #[error("{provider} error: {message}")]
    FatalUpstream { provider: Provider, message: String },

    /// Transient failures persisted through every retry attempt.
    #[error("Retries exhausted after {attempts} attempts: {message}")]
    RetriesExhausted {
        attempts: u32,
        rate_limited: bool,
        message: String,
    },

    /// Every candidate in the fallback plan failed.
    #[error("All candidates exhausted: {last_error}")]
    AllCandidatesExhausted {
        /// `true` when the most recent failure was rate-limit driven.
        rate_limited: bool,
        last_error: Box<GenerationError>,
    },

    /// The credit layer refused the request.
    #[error("Insufficient credits: {required} required")]
    InsufficientCredits { required: u32 },

    /// The caller cancelled the operation.
    #[error("Cancelled")]
    Cancelled,

    /// The operation exceeded its deadline.
    #[error("Timeout")]
    Timeout,

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GenerationError {
    /// Returns `true` for errors the retry executor may retry in place.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientUpstream { .. } | Self::Timeout)
    }

    /// Retry classification of this error.
    pub fn classification(&self) -> Classification {
        if self.is_transient() {
            Classification::Transient
        } else {
            Classification::Fatal
        }
    }

    /// Returns `true` when the failure was caused by rate limiting, looking
    /// through retry and fallback wrappers.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::TransientUpstream { rate_limited, .. }
            | Self::RetriesExhausted { rate_limited, .. }
            | Self::AllCandidatesExhausted { rate_limited, .. } => *rate_limited,
            _ => false,
        }
    }

    /// Whether a failure of one candidate should move on to the next one.
    ///
    /// Validation, capability, credit, and cancellation errors stop the
    /// whole request.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            Self::TransientUpstream { .. }
                | Self::FatalUpstream { .. }
                | Self::RetriesExhausted { .. }
                | Self::Timeout
        )
    }

    /// Text suitable for showing to the end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::AllCandidatesExhausted {
                rate_limited: true, ..
            } => RATE_LIMITED_USER_MESSAGE.to_string(),
            Self::AllCandidatesExhausted { last_error, .. } => last_error.to_string(),
            other => other.to_string(),
        }
    }

    pub(crate) fn transient(provider: Provider, message: impl Into<String>) -> Self {
        Self::TransientUpstream {
            provider,
            message: message.into(),
            rate_limited: false,
        }
    }

    pub(crate) fn rate_limited(provider: Provider, message: impl Into<String>) -> Self {
        Self::TransientUpstream {
            provider,
            message: message.into(),
            rate_limited: true,
        }
    }

    pub(crate) fn fatal(provider: Provider, message: impl Into<String>) -> Self {
        Self::FatalUpstream {
            provider,
            message: message.into(),
        }
    }

    /// The innermost message, without wrapper prefixes.
    pub(crate) fn upstream_message(&self) -> String {
        match self {
            Self::TransientUpstream { message, .. }
            | Self::FatalUpstream { message, .. }
            | Self::RetriesExhausted { message, .. } => message.clone(),
            Self::AllCandidatesExhausted { last_error, .. } => last_error.upstream_message(),
            other => other.to_string(),
        }
    }
}
