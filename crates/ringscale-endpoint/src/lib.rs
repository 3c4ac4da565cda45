//! ringscale-endpoint — one managed service.
//!
//! An [`Endpoint`] owns its configuration and instance bookkeeping (all of
//! it held in the coordination store) and runs two steps per control-loop
//! tick on the manager that owns it:
//!
//! ```text
//!   load_metrics ──► health_check ──► update
//!                    │                │
//!                    │ reap vanished, │ target from rules,
//!                    │ unregistered,  │ recommission, launch,
//!                    │ drained        │ decommission (ramp-limited)
//!                    ▼                ▼
//!              cloud driver      load-balancer backend list
//! ```
//!
//! Endpoints never hold their manager. They reach drivers and the shared
//! backend table through the narrow [`EndpointHost`] interface, which the
//! manager detaches when it drops the endpoint.

pub mod endpoint;
pub mod error;
pub mod events;
pub mod health;
pub mod host;
pub mod scaling;

#[cfg(test)]
mod testing;

pub use endpoint::{Endpoint, LoadedMetrics};
pub use error::{EndpointError, EndpointResult};
pub use events::EndpointEvent;
pub use health::{DECOMMISSIONED_MARK, ERROR_MARK, HealthReport, UNREGISTERED_MARK};
pub use host::{BackendTable, EndpointHost};
pub use ringscale_metrics::validate_config;
pub use scaling::{UpdateOutcome, clamp_target};
