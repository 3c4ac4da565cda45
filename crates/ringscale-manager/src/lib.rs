//! ringscale-manager — the control loop of one fleet member.
//!
//! # Architecture
//!
//! ```text
//!                 ┌───────────── coordination store ─────────────┐
//!                 │ ring keys · manager info · endpoints · inbox │
//!                 └──────▲──────────────────────────────┬────────┘
//!     register/aggregate │                              │ watches
//!                 ┌──────┴──────────────────────────────▼────────┐
//!                 │ ScaleManager                                 │
//!                 │   Membership ── Ring ── OwnershipCache       │
//!                 │   ManagerHost (drivers, BackendTable)        │
//!                 │   endpoints: name -> Arc<Mutex<Endpoint>>    │
//!                 └──────┬──────────────────────────────┬────────┘
//!              owned:    │ tick (health + update)       │ all: stage backends
//!                 ┌──────▼────────┐              ┌──────▼──────────┐
//!                 │ cloud driver  │              │ load balancer   │
//!                 └───────────────┘              └─────────────────┘
//! ```
//!
//! Every manager hosts every endpoint and renders all of them on its own
//! load balancers. Ownership on the ring decides which single manager
//! runs an endpoint's health check and update.

pub mod error;
pub mod events;
pub mod host;
pub mod manager;

pub use error::{ManagerError, ManagerResult};
pub use events::ManagerEvent;
pub use host::ManagerHost;
pub use manager::{ScaleManager, SharedEndpoint, TickReport};
