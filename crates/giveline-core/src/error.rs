use thiserror::Error;

/// Subsystem-wide error taxonomy. Gateway handlers map each variant onto an
/// HTTP status; user-visible messages are plain reason strings, never the
/// internal kind.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Payment-provider failure. `retryable` distinguishes transient network
    /// or 5xx conditions from definitive declines, which must never be
    /// retried.
    #[error("payment provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn provider_transient(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn provider_terminal(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { retryable: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
