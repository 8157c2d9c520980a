//! Error types for the session and rotation engine.

/// Top-level error type for the inventory engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Authentication failed (bad client configuration, denied consent,
    /// provider-side token error).
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The backing store rejected the credential (HTTP 401). Forces the
    /// session to signed-out and clears the persisted credential.
    #[error("session expired, please sign in again")]
    SessionExpired,

    /// Transport failure or non-2xx, non-401 response. Recoverable; does
    /// not change session state.
    #[error("network error: {0}")]
    Network(String),

    /// Empty or headerless result set from the backing store.
    #[error("data format error: {0}")]
    DataFormat(String),

    /// A quantity write failed after the local optimistic update.
    #[error("update failed, please try again: {0}")]
    Write(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Client-side key-value storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EngineError>;
