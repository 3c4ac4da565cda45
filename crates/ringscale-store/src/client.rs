//! The coordination-store client seam.
//!
//! Everything above the store talks to `dyn CoordinationStore`. A client
//! owns one session: ephemeral nodes it creates vanish when the session
//! ends, and every watch it arms is delivered on its own event channel.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::error::{StoreError, StoreResult};

/// Identity of a store session.
pub type SessionId = u64;

/// Lifetime of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Survives the writer; persisted to disk.
    Persistent,
    /// Removed automatically when the writer's session ends.
    Ephemeral,
}

/// Which aspect of a node a watch observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    /// The node's value was created, changed or deleted.
    Data,
    /// A direct child appeared or disappeared.
    Children,
}

/// A fired watch. Watches are one-shot: re-arm to keep observing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: String,
    pub kind: WatchKind,
}

/// Primitives a ringscale fleet needs from its coordination service.
pub trait CoordinationStore: Send + Sync {
    /// Ensure a live session, opening a new one if the old one expired.
    fn connect(&self) -> StoreResult<SessionId>;

    /// End the session. Ephemeral nodes and watches are dropped.
    fn close(&self) -> StoreResult<()>;

    /// The current session, if one is open.
    fn session(&self) -> Option<SessionId>;

    fn get(&self, path: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Create or replace a node.
    fn set(&self, path: &str, value: &[u8], kind: NodeKind) -> StoreResult<()>;

    /// Create a persistent node named `{prefix}{sequence}` with a
    /// monotonically increasing, zero-padded sequence. Returns the path.
    fn create_sequential(&self, prefix: &str, value: &[u8]) -> StoreResult<String>;

    /// Create a node only if it does not exist. Returns whether it was created.
    fn create_exclusive(&self, path: &str, value: &[u8], kind: NodeKind) -> StoreResult<bool>;

    /// Delete a node and everything below it. Returns whether anything existed.
    fn delete(&self, path: &str) -> StoreResult<bool>;

    /// Names of the direct children of `path`, sorted.
    fn children(&self, path: &str) -> StoreResult<Vec<String>>;

    /// Arm a one-shot data watch on `path` and return its current value.
    fn watch_data(&self, path: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Arm a one-shot child watch on `path` and return its current children.
    fn watch_children(&self, path: &str) -> StoreResult<Vec<String>>;

    /// Disarm every watch held by this client.
    fn unwatch_all(&self);

    /// Take the receiving end of this client's watch channel. Only the
    /// first call returns `Some`.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<WatchEvent>>;
}

/// JSON and string helpers over any store.
pub trait StoreExt: CoordinationStore {
    fn get_json<T: DeserializeOwned>(&self, path: &str) -> StoreResult<Option<T>> {
        match self.get(path)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Deserialize {
                    path: path.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        value: &T,
        kind: NodeKind,
    ) -> StoreResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| StoreError::Serialize(e.to_string()))?;
        self.set(path, &bytes, kind)
    }

    fn get_string(&self, path: &str) -> StoreResult<Option<String>> {
        Ok(self
            .get(path)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn set_string(&self, path: &str, value: &str, kind: NodeKind) -> StoreResult<()> {
        self.set(path, value.as_bytes(), kind)
    }

    fn exists(&self, path: &str) -> StoreResult<bool> {
        Ok(self.get(path)?.is_some())
    }
}

impl<S: CoordinationStore + ?Sized> StoreExt for S {}
