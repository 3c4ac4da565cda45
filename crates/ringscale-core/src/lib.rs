//! ringscale-core — shared types and configuration for ringscale.
//!
//! Every other crate in the workspace speaks in these types: endpoint
//! state, instances, load-balancer backends, metric samples, and the
//! JSON/TOML configuration documents that drive a manager fleet.

pub mod config;
pub mod error;
pub mod hash;
pub mod types;

pub use config::{DaemonConfig, EndpointConfig, EndpointSeed, ManagerConfig, ScalingConfig};
pub use error::{ConfigError, ConfigResult};
pub use hash::{random_key, sha_hash};
pub use types::*;
