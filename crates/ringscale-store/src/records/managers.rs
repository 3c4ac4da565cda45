//! Manager-side records: ring tokens, registration info, configuration,
//! and the per-manager aggregation slots.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use ringscale_core::{ManagerConfig, ManagerInfo, MergedMetrics};

use crate::client::{CoordinationStore, NodeKind, StoreExt};
use crate::error::StoreResult;
use crate::eventlog::{EventLog, MANAGER_LOG_LIMIT};
use crate::paths;

#[derive(Clone)]
pub struct ManagerRecords {
    store: Arc<dyn CoordinationStore>,
}

impl ManagerRecords {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    // ── Ring tokens ────────────────────────────────────────────────

    pub fn publish_key(&self, key: &str, uuid: &str) -> StoreResult<()> {
        self.store
            .set_string(&paths::manager_key(key), uuid, NodeKind::Ephemeral)
    }

    pub fn drop_key(&self, key: &str) -> StoreResult<bool> {
        self.store.delete(&paths::manager_key(key))
    }

    /// Every live ring token: key -> manager uuid.
    pub fn ring_keys(&self) -> StoreResult<HashMap<String, String>> {
        let mut out = HashMap::new();
        for key in self.store.children(paths::MANAGER_KEYS)? {
            // A token can vanish between listing and reading.
            if let Some(uuid) = self.store.get_string(&paths::manager_key(&key))? {
                out.insert(key, uuid);
            }
        }
        Ok(out)
    }

    // ── Registration info ──────────────────────────────────────────

    pub fn publish_info(&self, info: &ManagerInfo) -> StoreResult<()> {
        self.store
            .set_json(&paths::manager_info(&info.uuid), info, NodeKind::Ephemeral)
    }

    pub fn info(&self, uuid: &str) -> StoreResult<Option<ManagerInfo>> {
        self.store.get_json(&paths::manager_info(uuid))
    }

    /// Every live manager's info, keyed by uuid. Malformed records are skipped.
    pub fn infos(&self) -> StoreResult<HashMap<String, ManagerInfo>> {
        let mut out = HashMap::new();
        for uuid in self.store.children(paths::MANAGER_INFO)? {
            match self.info(&uuid) {
                Ok(Some(info)) => {
                    out.insert(uuid, info);
                }
                Ok(None) => {}
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => warn!(%uuid, error = %e, "skipping malformed manager info"),
            }
        }
        Ok(out)
    }

    /// Remove everything this manager published under its uuid.
    pub fn unpublish(&self, uuid: &str) -> StoreResult<()> {
        self.store.delete(&paths::manager_info(uuid))?;
        self.store.delete(&paths::manager_metrics(uuid))?;
        self.store.delete(&paths::manager_pending(uuid))?;
        self.store.delete(&paths::manager_active(uuid))?;
        Ok(())
    }

    // ── Configuration ──────────────────────────────────────────────

    pub fn config(&self, name: &str) -> StoreResult<Option<ManagerConfig>> {
        self.store.get_json(&paths::manager_config(name))
    }

    pub fn set_config(&self, name: &str, config: &ManagerConfig) -> StoreResult<()> {
        self.store
            .set_json(&paths::manager_config(name), config, NodeKind::Persistent)
    }

    /// The effective configuration for a manager with several names. Later
    /// names override earlier ones.
    pub fn merged_config(&self, names: &[String]) -> StoreResult<ManagerConfig> {
        let mut merged: Option<ManagerConfig> = None;
        for name in names {
            match self.config(name) {
                Ok(Some(config)) => match merged.as_mut() {
                    Some(m) => m.merge(config),
                    None => merged = Some(config),
                },
                Ok(None) => {}
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => warn!(%name, error = %e, "ignoring malformed manager config"),
            }
        }
        Ok(merged.unwrap_or_default())
    }

    pub fn config_names(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .store
            .children(paths::MANAGER_CONFIGS)?
            .iter()
            .map(|n| paths::unsegment(n))
            .collect())
    }

    // ── Aggregation slots ──────────────────────────────────────────

    pub fn publish_metrics(&self, uuid: &str, metrics: &MergedMetrics) -> StoreResult<()> {
        self.store
            .set_json(&paths::manager_metrics(uuid), metrics, NodeKind::Ephemeral)
    }

    /// Every live manager's published metrics, keyed by uuid.
    pub fn all_metrics(&self) -> StoreResult<HashMap<String, MergedMetrics>> {
        self.collect(paths::MANAGER_METRICS)
    }

    pub fn publish_pending(&self, uuid: &str, pending: &HashMap<String, u64>) -> StoreResult<()> {
        self.store
            .set_json(&paths::manager_pending(uuid), pending, NodeKind::Ephemeral)
    }

    pub fn all_pending(&self) -> StoreResult<HashMap<String, HashMap<String, u64>>> {
        self.collect(paths::MANAGER_PENDING)
    }

    pub fn publish_active(&self, uuid: &str, active: u64) -> StoreResult<()> {
        self.store
            .set_json(&paths::manager_active(uuid), &active, NodeKind::Ephemeral)
    }

    /// Active connections summed across every live manager.
    pub fn active_count(&self) -> StoreResult<u64> {
        let all: HashMap<String, u64> = self.collect(paths::MANAGER_ACTIVE)?;
        Ok(all.values().sum())
    }

    fn collect<T: serde::de::DeserializeOwned>(&self, root: &str) -> StoreResult<HashMap<String, T>> {
        let mut out = HashMap::new();
        for uuid in self.store.children(root)? {
            match self.store.get_json::<T>(&format!("{root}/{uuid}")) {
                Ok(Some(value)) => {
                    out.insert(uuid, value);
                }
                Ok(None) => {}
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => warn!(%uuid, %root, error = %e, "skipping malformed manager record"),
            }
        }
        Ok(out)
    }

    // ── Globals ────────────────────────────────────────────────────

    pub fn url(&self) -> StoreResult<Option<String>> {
        self.store.get_string(paths::URL)
    }

    pub fn set_url(&self, url: &str) -> StoreResult<()> {
        self.store.set_string(paths::URL, url, NodeKind::Persistent)
    }

    pub fn auth_hash(&self) -> StoreResult<Option<String>> {
        self.store.get_string(paths::AUTH_HASH)
    }

    pub fn set_auth_hash(&self, hash: &str) -> StoreResult<()> {
        self.store
            .set_string(paths::AUTH_HASH, hash, NodeKind::Persistent)
    }

    pub fn log(&self, name: &str) -> EventLog {
        EventLog::new(self.store.clone(), paths::manager_log(name), MANAGER_LOG_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedded::EmbeddedStore;
    use ringscale_core::Capabilities;

    fn test_records() -> (EmbeddedStore, ManagerRecords) {
        let store = EmbeddedStore::open_in_memory().unwrap();
        let client: Arc<dyn CoordinationStore> = Arc::new(store.client().unwrap());
        (store, ManagerRecords::new(client))
    }

    #[test]
    fn test_ring_keys_and_info() {
        let (_store, records) = test_records();
        records.publish_key("aa", "m1").unwrap();
        records.publish_key("bb", "m2").unwrap();
        let keys = records.ring_keys().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys["aa"], "m1");

        let info = ManagerInfo {
            uuid: "m1".to_string(),
            names: vec!["edge".to_string()],
            keys: vec!["aa".to_string()],
            capabilities: Capabilities::default(),
            registered_at: 1,
        };
        records.publish_info(&info).unwrap();
        assert_eq!(records.infos().unwrap()["m1"], info);
        records.unpublish("m1").unwrap();
        assert!(records.infos().unwrap().is_empty());
    }

    #[test]
    fn test_merged_config() {
        let (_store, records) = test_records();
        assert_eq!(records.merged_config(&["x".to_string()]).unwrap(), ManagerConfig::default());

        records
            .set_config("a", &ManagerConfig { clouds: vec!["memory".to_string()], keys: 4, ..Default::default() })
            .unwrap();
        records
            .set_config("b", &ManagerConfig { loadbalancers: vec!["memory".to_string()], keys: 8, ..Default::default() })
            .unwrap();
        let merged = records
            .merged_config(&["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(merged.clouds, vec!["memory".to_string()]);
        assert_eq!(merged.loadbalancers, vec!["memory".to_string()]);
        assert_eq!(merged.keys, 8);
        assert_eq!(records.config_names().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_active_count_sums_managers() {
        let (_store, records) = test_records();
        records.publish_active("m1", 3).unwrap();
        records.publish_active("m2", 4).unwrap();
        assert_eq!(records.active_count().unwrap(), 7);
    }
}
