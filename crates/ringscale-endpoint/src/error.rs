//! Error types for endpoint operations.

use thiserror::Error;

use ringscale_core::ConfigError;
use ringscale_drivers::DriverError;
use ringscale_store::StoreError;

/// Result type alias for endpoint operations.
pub type EndpointResult<T> = Result<T, EndpointError>;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("driver {0:?} is not available on this manager")]
    DriverUnavailable(String),

    #[error("endpoint {0} is detached from its manager")]
    Detached(String),
}

impl EndpointError {
    /// Whether the underlying cause is a lost store session.
    pub fn is_transient(&self) -> bool {
        match self {
            EndpointError::Store(e) | EndpointError::Driver(DriverError::Store(e)) => {
                e.is_transient()
            }
            _ => false,
        }
    }
}
