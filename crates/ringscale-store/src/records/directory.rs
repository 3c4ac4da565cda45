//! The set of managed endpoints.
//!
//! Endpoints are soft-deleted: `unmanage` only raises the `deleting` flag,
//! and `clean` hard-deletes flagged endpoints once no live manager still
//! claims them.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use ringscale_core::{EndpointConfig, EndpointState};
use ringscale_metrics::validate_config;

use crate::client::CoordinationStore;
use crate::error::StoreResult;
use crate::paths;
use crate::records::endpoints::EndpointRecords;

#[derive(Clone)]
pub struct EndpointDirectory {
    store: Arc<dyn CoordinationStore>,
}

impl EndpointDirectory {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    pub fn records(&self, name: &str) -> EndpointRecords {
        EndpointRecords::new(self.store.clone(), name)
    }

    /// Every endpoint name, including those being deleted.
    pub fn list(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .store
            .children(paths::ENDPOINTS)?
            .iter()
            .map(|n| paths::unsegment(n))
            .collect())
    }

    /// Create or update an endpoint. Clears a pending delete. A config
    /// that fails validation is refused and nothing is written.
    pub fn manage(&self, name: &str, config: &EndpointConfig) -> StoreResult<()> {
        validate_config(config)?;
        let records = self.records(name);
        records.set_config(config)?;
        if records.clear_deleting()? {
            info!(endpoint = %name, "endpoint delete cancelled");
        }
        info!(endpoint = %name, "endpoint managed");
        Ok(())
    }

    /// Flag an endpoint for deletion. Returns false if it does not exist.
    pub fn unmanage(&self, name: &str) -> StoreResult<bool> {
        if !self.list()?.iter().any(|n| n == name) {
            return Ok(false);
        }
        self.records(name).set_deleting()?;
        info!(endpoint = %name, "endpoint marked for deletion");
        Ok(true)
    }

    /// Hard-delete every flagged endpoint that no manager claims any more.
    pub fn clean(&self) -> StoreResult<Vec<String>> {
        let mut cleaned = Vec::new();
        for name in self.list()? {
            let records = self.records(&name);
            if !records.is_deleting()? {
                continue;
            }
            if let Some(manager) = records.manager()? {
                warn!(endpoint = %name, %manager, "endpoint still claimed, deferring delete");
                continue;
            }
            records.delete_all()?;
            info!(endpoint = %name, "endpoint deleted");
            cleaned.push(name);
        }
        Ok(cleaned)
    }

    /// Endpoint count per effective state.
    pub fn state_counts(&self) -> StoreResult<HashMap<EndpointState, usize>> {
        let mut counts = HashMap::new();
        for name in self.list()? {
            let records = self.records(&name);
            let default = records
                .config()
                .ok()
                .flatten()
                .map(|c| c.initial_state)
                .unwrap_or(EndpointState::Paused);
            let state = records.state()?.unwrap_or(default);
            *counts.entry(state).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
