//! Error types for the scale manager.

use thiserror::Error;

use ringscale_core::ConfigError;
use ringscale_drivers::DriverError;
use ringscale_endpoint::EndpointError;
use ringscale_store::StoreError;

/// Result type alias for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("manager {0} is not serving")]
    NotServing(String),
}

impl ManagerError {
    /// Whether a reconnect and re-register can cure this.
    pub fn is_transient(&self) -> bool {
        match self {
            ManagerError::Store(e) | ManagerError::Driver(DriverError::Store(e)) => {
                e.is_transient()
            }
            ManagerError::Endpoint(e) => e.is_transient(),
            _ => false,
        }
    }
}
