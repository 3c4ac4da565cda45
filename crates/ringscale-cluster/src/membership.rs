//! Manager membership: ring tokens and registration info.
//!
//! Both are liveness-bound: when a manager's store session ends its tokens
//! and info vanish and the other managers' rings shrink on the next watch.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use ringscale_core::{Capabilities, ManagerInfo, epoch_secs, random_key};
use ringscale_store::{CoordinationStore, ManagerRecords, StoreResult};

use crate::ring::Ring;

pub struct Membership {
    uuid: String,
    names: Vec<String>,
    records: ManagerRecords,
    keys: Vec<String>,
}

impl Membership {
    pub fn new(store: Arc<dyn CoordinationStore>, uuid: &str, names: Vec<String>) -> Self {
        Self {
            uuid: uuid.to_string(),
            names,
            records: ManagerRecords::new(store),
            keys: Vec::new(),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Ring tokens currently held.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Publish exactly `wanted` tokens and this manager's info.
    ///
    /// Existing tokens are kept where possible so that re-registering
    /// after a config change moves as few endpoints as it can.
    pub fn register(&mut self, wanted: usize, capabilities: Capabilities) -> StoreResult<()> {
        for key in self.keys.split_off(wanted.min(self.keys.len())) {
            self.records.drop_key(&key)?;
        }
        while self.keys.len() < wanted {
            self.keys.push(random_key());
        }
        for key in &self.keys {
            self.records.publish_key(key, &self.uuid)?;
        }
        self.records.publish_info(&ManagerInfo {
            uuid: self.uuid.clone(),
            names: self.names.clone(),
            keys: self.keys.clone(),
            capabilities,
            registered_at: epoch_secs(),
        })?;
        info!(manager = %self.uuid, keys = self.keys.len(), "manager registered");
        Ok(())
    }

    /// Withdraw tokens and info. The tokens are kept locally so a later
    /// `register` reclaims the same ring positions.
    pub fn unregister(&self) -> StoreResult<()> {
        for key in &self.keys {
            self.records.drop_key(key)?;
        }
        self.records.unpublish(&self.uuid)?;
        debug!(manager = %self.uuid, "manager unregistered");
        Ok(())
    }

    /// Current ring snapshot.
    pub fn ring(&self) -> StoreResult<Ring> {
        Ok(Ring::new(self.records.ring_keys()?))
    }

    /// Capabilities of every live manager, keyed by uuid.
    pub fn capabilities(&self) -> StoreResult<HashMap<String, Capabilities>> {
        Ok(self
            .records
            .infos()?
            .into_iter()
            .map(|(uuid, info)| (uuid, info.capabilities))
            .collect())
    }
}
