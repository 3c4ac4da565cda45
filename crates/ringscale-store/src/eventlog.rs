//! Bounded, store-backed event logs.
//!
//! Each endpoint and each manager name keeps an audit trail of what it did
//! as sequential nodes under its `log` path. Appends prune the oldest
//! entries past the limit. Every entry is mirrored to `tracing`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use ringscale_core::epoch_secs;

use crate::client::{CoordinationStore, StoreExt};
use crate::error::{StoreError, StoreResult};

/// Entries kept per endpoint log.
pub const ENDPOINT_LOG_LIMIT: usize = 100;

/// Entries kept per manager log.
pub const MANAGER_LOG_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: u64,
    pub severity: Severity,
    pub message: String,
}

/// A ring buffer of `LogEntry` nodes under one path.
#[derive(Clone)]
pub struct EventLog {
    store: Arc<dyn CoordinationStore>,
    path: String,
    limit: usize,
}

impl EventLog {
    pub fn new(store: Arc<dyn CoordinationStore>, path: String, limit: usize) -> Self {
        Self { store, path, limit }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn info(&self, message: impl fmt::Display) -> StoreResult<()> {
        self.append(Severity::Info, message.to_string())
    }

    pub fn warn(&self, message: impl fmt::Display) -> StoreResult<()> {
        self.append(Severity::Warn, message.to_string())
    }

    pub fn error(&self, message: impl fmt::Display) -> StoreResult<()> {
        self.append(Severity::Error, message.to_string())
    }

    pub fn append(&self, severity: Severity, message: String) -> StoreResult<()> {
        match severity {
            Severity::Info => info!(log = %self.path, "{message}"),
            Severity::Warn => warn!(log = %self.path, "{message}"),
            Severity::Error => error!(log = %self.path, "{message}"),
        }
        let entry = LogEntry {
            ts: epoch_secs(),
            severity,
            message,
        };
        let bytes = serde_json::to_vec(&entry).map_err(|e| StoreError::Serialize(e.to_string()))?;
        self.store
            .create_sequential(&format!("{}/entry-", self.path), &bytes)?;
        self.prune()
    }

    fn prune(&self) -> StoreResult<()> {
        let entries = self.store.children(&self.path)?;
        if entries.len() <= self.limit {
            return Ok(());
        }
        let excess = entries.len() - self.limit;
        for name in entries.iter().take(excess) {
            self.store.delete(&format!("{}/{}", self.path, name))?;
        }
        Ok(())
    }

    /// All retained entries, oldest first. Unreadable entries are skipped.
    pub fn entries(&self) -> StoreResult<Vec<LogEntry>> {
        let mut out = Vec::new();
        for name in self.store.children(&self.path)? {
            if let Ok(Some(entry)) = self
                .store
                .get_json::<LogEntry>(&format!("{}/{}", self.path, name))
            {
                out.push(entry);
            }
        }
        Ok(out)
    }

    pub fn clear(&self) -> StoreResult<()> {
        self.store.delete(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedded::EmbeddedStore;

    #[test]
    fn test_log_is_bounded() {
        let store = EmbeddedStore::open_in_memory().unwrap();
        let client: Arc<dyn CoordinationStore> = Arc::new(store.client().unwrap());
        let log = EventLog::new(client, "endpoints/web/log".to_string(), 3);
        for i in 0..5 {
            log.info(format!("event {i}")).unwrap();
        }
        log.warn("last").unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "event 3");
        assert_eq!(entries[2].message, "last");
        assert_eq!(entries[2].severity, Severity::Warn);

        log.clear().unwrap();
        assert!(log.entries().unwrap().is_empty());
    }
}
