//! Error types for the reconciliation core.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the reconciliation core.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error reported by the client.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried on the next poll tick.
        retryable: bool,
    },

    /// The local store rejected a mutation.
    #[error("store error: {0}")]
    Store(String),

    /// Operation requires a configured session.
    #[error("sync session is not configured")]
    NotConfigured,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state or operation.
        to: String,
    },

    /// An async response arrived for a generation that has since been
    /// invalidated by an enable/disable transition.
    #[error("stale response for generation {got}, current is {current}")]
    StaleGeneration {
        /// Generation the response was issued under.
        got: u64,
        /// Current session generation.
        current: u64,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried on the next poll tick.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::StaleGeneration { .. } => false,
            _ => false,
        }
    }
}
