use thiserror::Error;

/// Error taxonomy shared by the store, the delivery layer and the HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PulseError {
    /// Bad input. Surfaced immediately, never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Network, channel or store timeout. Safe to retry with backoff.
    #[error("transient delivery failure: {0}")]
    TransientDelivery(String),

    /// The operation raced a state transition that already happened
    /// (e.g. a second view of a one-time message). Callers treat it as a no-op.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Capability that exists in the API surface but is not offered yet.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PulseError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Only transient failures are worth retrying; everything else will fail
    /// the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientDelivery(_))
    }
}

impl From<anyhow::Error> for PulseError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e.to_string())
    }
}
