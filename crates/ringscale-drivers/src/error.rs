//! Error types for driver operations.

use thiserror::Error;

use ringscale_store::StoreError;

/// Result type alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("unknown driver: {0}")]
    Unknown(String),

    #[error("invalid driver configuration: {0}")]
    Config(String),

    #[error("cloud operation failed: {0}")]
    Cloud(String),

    #[error("load balancer operation failed: {0}")]
    LoadBalancer(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
