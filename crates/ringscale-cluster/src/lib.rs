//! ringscale-cluster — how managers share endpoints.
//!
//! # Components
//!
//! - **`ring`**: consistent-hash ring over every live manager's tokens,
//!   capability-aware owner resolution, and the per-key ownership cache
//! - **`membership`**: registering a manager: ring tokens plus its
//!   liveness-bound info record
//! - **`aggregate`**: publishing local load-balancer observations and
//!   merging every live manager's

pub mod aggregate;
pub mod membership;
pub mod ring;

pub use aggregate::{Aggregator, merge_metrics, merge_pending, to_merged};
pub use membership::Membership;
pub use ring::{OwnershipCache, Ring};
