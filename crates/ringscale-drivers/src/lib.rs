//! ringscale-drivers — the seams to the outside world.
//!
//! A cloud driver starts, lists and deletes instances. A load-balancer
//! driver renders the backend list for each URL and reports what it sees
//! (per-backend metrics, pending connections, client sessions).
//!
//! Drivers are resolved by name through a [`DriverRegistry`] populated once
//! at startup. The names a registry can build are exactly what a manager
//! advertises as its capabilities.

pub mod error;
pub mod memory;
pub mod registry;
pub mod traits;

pub use error::{DriverError, DriverResult};
pub use memory::{MemoryCloud, MemoryLoadBalancer};
pub use registry::{DriverContext, DriverRegistry, MEMORY_DRIVER};
pub use traits::{CloudDriver, LoadBalancerDriver};
