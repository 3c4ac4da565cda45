//! Error types for the coordination store.

use thiserror::Error;

use ringscale_core::ConfigError;

/// Result type alias for coordination store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during coordination store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error at {path}: {reason}")]
    Deserialize { path: String, reason: String },

    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    #[error("session expired")]
    SessionExpired,

    #[error("not connected")]
    Disconnected,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StoreError {
    /// Connection-level failures that a reconnect can cure.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::SessionExpired | StoreError::Disconnected)
    }
}
