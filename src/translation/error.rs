//! Error types for translation requests.

use std::time::Duration;
use thiserror::Error;

/// Outcome of a single failed engine call, before any retry decision.
#[derive(Debug, Clone, Error)]
pub enum EngineFailure {
    /// Connection refused, reset, DNS failure and similar.
    #[error("transport error: {0}")]
    Transport(String),

    /// Engine is overloaded or failing server-side (429, 5xx).
    #[error("engine unavailable ({status}): {message}")]
    Unavailable {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Engine answered 2xx but the body did not carry usable audio.
    #[error("invalid engine response: {0}")]
    InvalidResponse(String),

    /// Engine refused the request itself (4xx other than 429).
    #[error("engine rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl EngineFailure {
    /// Transient failures are worth another attempt; rejections are not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, EngineFailure::Rejected { .. })
    }

    /// Server-provided hint from a `Retry-After` header.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            EngineFailure::Unavailable { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Failure of a full [`TranslationGateway::translate`](super::TranslationGateway::translate) call.
#[derive(Debug, Clone, Error)]
pub enum TranslationError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("malformed audio payload: {0}")]
    MalformedPayload(String),

    /// Retries exhausted on transient failures.
    #[error("translation engine failed after {attempts} attempt(s): {message}")]
    Engine {
        attempts: u32,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Non-retryable refusal from the engine.
    #[error("translation engine rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The final attempt did not finish within the per-attempt ceiling.
    #[error("translation attempt timed out after {}ms", .timeout.as_millis())]
    Timeout { attempts: u32, timeout: Duration },

    #[error("internal error: {0}")]
    Internal(String),
}

impl TranslationError {
    /// Validation-class failures are reported but leave the session usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TranslationError::UnsupportedLanguage(_) | TranslationError::MalformedPayload(_)
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TranslationError::Engine { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
