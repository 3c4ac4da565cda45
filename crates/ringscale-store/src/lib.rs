//! ringscale-store — the coordination store for a ringscale fleet.
//!
//! Managers share exactly one mutable resource: a hierarchical key/value
//! tree with persistent, ephemeral (session-bound) and sequential nodes,
//! exclusive create, and one-shot watches on a node's value or its child
//! set.
//!
//! # Architecture
//!
//! ```text
//!   ScaleManager / Endpoint
//!            │  typed records (ManagerRecords, EndpointRecords, ...)
//!            ▼
//!   dyn CoordinationStore  ◄── one StoreClient per manager (one session)
//!            │
//!            ▼
//!   EmbeddedStore  (in-memory tree, persistent nodes written through to redb)
//! ```
//!
//! Values are opaque bytes; the record helpers store JSON. Watch
//! notifications are delivered on a per-client channel and never invoke
//! subscriber code from inside the store.

pub mod client;
pub mod embedded;
pub mod error;
pub mod eventlog;
pub mod paths;
pub mod records;
pub mod tables;

pub use client::{CoordinationStore, NodeKind, SessionId, StoreExt, WatchEvent, WatchKind};
pub use embedded::{EmbeddedStore, StoreClient};
pub use error::{StoreError, StoreResult};
pub use eventlog::{EventLog, LogEntry, Severity};
pub use records::*;
