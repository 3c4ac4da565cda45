//! Per-endpoint bookkeeping records.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::warn;

use ringscale_core::{EndpointConfig, EndpointState, Instance, Sample};

use crate::client::{CoordinationStore, NodeKind, StoreExt};
use crate::error::StoreResult;
use crate::eventlog::{ENDPOINT_LOG_LIMIT, EventLog};
use crate::paths;

/// Typed access to everything stored under `endpoints/{name}`.
#[derive(Clone)]
pub struct EndpointRecords {
    store: Arc<dyn CoordinationStore>,
    name: String,
}

impl EndpointRecords {
    pub fn new(store: Arc<dyn CoordinationStore>, name: &str) -> Self {
        Self {
            store,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    // ── Config and state ───────────────────────────────────────────

    pub fn config(&self) -> StoreResult<Option<EndpointConfig>> {
        self.store.get_json(&paths::endpoint_config(&self.name))
    }

    pub fn set_config(&self, config: &EndpointConfig) -> StoreResult<()> {
        self.store
            .set_json(&paths::endpoint_config(&self.name), config, NodeKind::Persistent)
    }

    /// Recorded state, if any has been recorded.
    pub fn state(&self) -> StoreResult<Option<EndpointState>> {
        match self.store.get_string(&paths::endpoint_state(&self.name))? {
            Some(raw) => Ok(raw.trim_matches('"').parse().ok()),
            None => Ok(None),
        }
    }

    pub fn set_state(&self, state: EndpointState) -> StoreResult<()> {
        self.store
            .set_json(&paths::endpoint_state(&self.name), &state, NodeKind::Persistent)
    }

    /// Apply an action token to the recorded state (or `default` when none
    /// is recorded) and persist the result.
    pub fn action(&self, token: &str, default: EndpointState) -> StoreResult<EndpointState> {
        let current = self.state()?.unwrap_or(default);
        let next = current.from_action(token);
        if next != current || self.state()?.is_none() {
            self.set_state(next)?;
        }
        Ok(next)
    }

    // ── Ownership ──────────────────────────────────────────────────

    /// The manager currently claiming this endpoint.
    pub fn manager(&self) -> StoreResult<Option<String>> {
        self.store.get_string(&paths::endpoint_manager(&self.name))
    }

    pub fn set_manager(&self, uuid: &str) -> StoreResult<()> {
        self.store
            .set_string(&paths::endpoint_manager(&self.name), uuid, NodeKind::Ephemeral)
    }

    pub fn clear_manager(&self) -> StoreResult<bool> {
        self.store.delete(&paths::endpoint_manager(&self.name))
    }

    pub fn is_deleting(&self) -> StoreResult<bool> {
        self.store.exists(&paths::endpoint_deleting(&self.name))
    }

    pub fn set_deleting(&self) -> StoreResult<()> {
        self.store
            .set_string(&paths::endpoint_deleting(&self.name), "1", NodeKind::Persistent)
    }

    pub fn clear_deleting(&self) -> StoreResult<bool> {
        self.store.delete(&paths::endpoint_deleting(&self.name))
    }

    // ── Confirmed IPs ──────────────────────────────────────────────

    pub fn confirmed_ips(&self) -> StoreResult<BTreeSet<String>> {
        Ok(self
            .store
            .children(&paths::endpoint_confirmed_ips(&self.name))?
            .iter()
            .map(|n| paths::unsegment(n))
            .collect())
    }

    pub fn confirm_ip(&self, ip: &str) -> StoreResult<()> {
        let path = paths::child(&paths::endpoint_confirmed_ips(&self.name), ip);
        self.store.set_string(&path, ip, NodeKind::Persistent)
    }

    pub fn unconfirm_ip(&self, ip: &str) -> StoreResult<bool> {
        self.store
            .delete(&paths::child(&paths::endpoint_confirmed_ips(&self.name), ip))
    }

    // ── Instances ──────────────────────────────────────────────────

    pub fn instances(&self) -> StoreResult<BTreeMap<String, Instance>> {
        self.instance_map(&paths::endpoint_instances(&self.name))
    }

    pub fn put_instance(&self, instance: &Instance) -> StoreResult<()> {
        let path = paths::child(&paths::endpoint_instances(&self.name), &instance.id);
        self.store.set_json(&path, instance, NodeKind::Persistent)
    }

    pub fn remove_instance(&self, id: &str) -> StoreResult<bool> {
        self.store
            .delete(&paths::child(&paths::endpoint_instances(&self.name), id))
    }

    pub fn decommissioned(&self) -> StoreResult<BTreeMap<String, Instance>> {
        self.instance_map(&paths::endpoint_decommissioned(&self.name))
    }

    pub fn put_decommissioned(&self, instance: &Instance) -> StoreResult<()> {
        let path = paths::child(&paths::endpoint_decommissioned(&self.name), &instance.id);
        self.store.set_json(&path, instance, NodeKind::Persistent)
    }

    pub fn remove_decommissioned(&self, id: &str) -> StoreResult<bool> {
        self.store
            .delete(&paths::child(&paths::endpoint_decommissioned(&self.name), id))
    }

    /// Instances pulled from service after reporting errors, waiting to
    /// drain before deletion.
    pub fn errored(&self) -> StoreResult<BTreeMap<String, Instance>> {
        self.instance_map(&paths::endpoint_errored(&self.name))
    }

    pub fn put_errored(&self, instance: &Instance) -> StoreResult<()> {
        let path = paths::child(&paths::endpoint_errored(&self.name), &instance.id);
        self.store.set_json(&path, instance, NodeKind::Persistent)
    }

    pub fn remove_errored(&self, id: &str) -> StoreResult<bool> {
        self.store
            .delete(&paths::child(&paths::endpoint_errored(&self.name), id))
    }

    fn instance_map(&self, root: &str) -> StoreResult<BTreeMap<String, Instance>> {
        let mut out = BTreeMap::new();
        for name in self.store.children(root)? {
            match self.store.get_json::<Instance>(&format!("{root}/{name}")) {
                Ok(Some(instance)) => {
                    out.insert(instance.id.clone(), instance);
                }
                Ok(None) => {}
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => warn!(endpoint = %self.name, %name, error = %e, "skipping malformed instance record"),
            }
        }
        Ok(out)
    }

    // ── Marks ──────────────────────────────────────────────────────

    /// Failure counters for one instance: label -> count.
    pub fn marks(&self, id: &str) -> StoreResult<BTreeMap<String, u32>> {
        let path = paths::child(&paths::endpoint_marked(&self.name), id);
        match self.store.get_json(&path) {
            Ok(marks) => Ok(marks.unwrap_or_default()),
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                warn!(endpoint = %self.name, instance = %id, error = %e, "resetting malformed marks");
                Ok(BTreeMap::new())
            }
        }
    }

    pub fn set_marks(&self, id: &str, marks: &BTreeMap<String, u32>) -> StoreResult<()> {
        let path = paths::child(&paths::endpoint_marked(&self.name), id);
        if marks.is_empty() {
            self.store.delete(&path)?;
            return Ok(());
        }
        self.store.set_json(&path, marks, NodeKind::Persistent)
    }

    pub fn clear_marks(&self, id: &str) -> StoreResult<bool> {
        self.store
            .delete(&paths::child(&paths::endpoint_marked(&self.name), id))
    }

    pub fn marked_ids(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .store
            .children(&paths::endpoint_marked(&self.name))?
            .iter()
            .map(|n| paths::unsegment(n))
            .collect())
    }

    // ── Operator metrics ───────────────────────────────────────────

    pub fn custom_metrics(&self) -> StoreResult<Option<Sample>> {
        match self.store.get_json(&paths::endpoint_custom_metrics(&self.name)) {
            Err(e) if !e.is_transient() => {
                warn!(endpoint = %self.name, error = %e, "ignoring malformed custom metrics");
                Ok(None)
            }
            other => other,
        }
    }

    pub fn set_custom_metrics(&self, sample: Option<&Sample>) -> StoreResult<()> {
        let path = paths::endpoint_custom_metrics(&self.name);
        match sample {
            Some(sample) => self.store.set_json(&path, sample, NodeKind::Persistent),
            None => self.store.delete(&path).map(|_| ()),
        }
    }

    /// Operator-supplied samples per backend IP.
    pub fn ip_metrics(&self) -> StoreResult<HashMap<String, Sample>> {
        let root = paths::endpoint_ip_metrics(&self.name);
        let mut out = HashMap::new();
        for name in self.store.children(&root)? {
            match self.store.get_json::<Sample>(&format!("{root}/{name}")) {
                Ok(Some(sample)) => {
                    out.insert(paths::unsegment(&name), sample);
                }
                Ok(None) => {}
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => warn!(endpoint = %self.name, ip = %name, error = %e, "ignoring malformed ip metrics"),
            }
        }
        Ok(out)
    }

    pub fn set_ip_metrics(&self, ip: &str, sample: &Sample) -> StoreResult<()> {
        let path = paths::child(&paths::endpoint_ip_metrics(&self.name), ip);
        self.store.set_json(&path, sample, NodeKind::Persistent)
    }

    pub fn remove_ip_metrics(&self, ip: &str) -> StoreResult<bool> {
        self.store
            .delete(&paths::child(&paths::endpoint_ip_metrics(&self.name), ip))
    }

    // ── Live views ─────────────────────────────────────────────────

    pub fn publish_live_metrics(&self, totals: &BTreeMap<String, f64>) -> StoreResult<()> {
        self.store
            .set_json(&paths::endpoint_live_metrics(&self.name), totals, NodeKind::Ephemeral)
    }

    pub fn live_metrics(&self) -> StoreResult<Option<BTreeMap<String, f64>>> {
        self.store.get_json(&paths::endpoint_live_metrics(&self.name))
    }

    pub fn publish_live_active(&self, active: &[String]) -> StoreResult<()> {
        self.store
            .set_json(&paths::endpoint_live_active(&self.name), active, NodeKind::Ephemeral)
    }

    pub fn live_active(&self) -> StoreResult<Option<Vec<String>>> {
        self.store.get_json(&paths::endpoint_live_active(&self.name))
    }

    // ── Sessions ───────────────────────────────────────────────────

    /// Open sessions: client -> backend.
    pub fn sessions(&self) -> StoreResult<BTreeMap<String, String>> {
        let root = paths::endpoint_sessions(&self.name);
        let mut out = BTreeMap::new();
        for name in self.store.children(&root)? {
            if let Some(backend) = self.store.get_string(&format!("{root}/{name}"))? {
                out.insert(paths::unsegment(&name), backend);
            }
        }
        Ok(out)
    }

    pub fn open_session(&self, client: &str, backend: &str) -> StoreResult<()> {
        let path = paths::child(&paths::endpoint_sessions(&self.name), client);
        self.store.set_string(&path, backend, NodeKind::Persistent)
    }

    pub fn close_session(&self, client: &str) -> StoreResult<bool> {
        self.store
            .delete(&paths::child(&paths::endpoint_sessions(&self.name), client))
    }

    pub fn log(&self) -> EventLog {
        EventLog::new(
            self.store.clone(),
            paths::endpoint_log(&self.name),
            ENDPOINT_LOG_LIMIT,
        )
    }

    /// Remove the whole endpoint subtree.
    pub fn delete_all(&self) -> StoreResult<bool> {
        self.store.delete(&paths::endpoint(&self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedded::EmbeddedStore;

    fn test_records() -> (EmbeddedStore, EndpointRecords) {
        let store = EmbeddedStore::open_in_memory().unwrap();
        let client: Arc<dyn CoordinationStore> = Arc::new(store.client().unwrap());
        (store, EndpointRecords::new(client, "web"))
    }

    #[test]
    fn test_state_defaults_and_actions() {
        let (_store, records) = test_records();
        assert_eq!(records.state().unwrap(), None);
        assert_eq!(records.action("bogus", EndpointState::Paused).unwrap(), EndpointState::Paused);
        assert_eq!(records.state().unwrap(), Some(EndpointState::Paused));
        assert_eq!(records.action("start", EndpointState::Paused).unwrap(), EndpointState::Running);
        assert_eq!(records.state().unwrap(), Some(EndpointState::Running));
    }

    #[test]
    fn test_instances_and_decommissioned() {
        let (_store, records) = test_records();
        let instance = Instance::new("i-1", "web-1", vec!["10.0.0.1".to_string()]);
        records.put_instance(&instance).unwrap();
        assert_eq!(records.instances().unwrap()["i-1"], instance);

        records.remove_instance("i-1").unwrap();
        records.put_decommissioned(&instance).unwrap();
        assert!(records.instances().unwrap().is_empty());
        assert_eq!(records.decommissioned().unwrap().len(), 1);

        records.put_errored(&instance).unwrap();
        assert_eq!(records.errored().unwrap()["i-1"], instance);
        assert!(records.remove_errored("i-1").unwrap());
        assert!(records.errored().unwrap().is_empty());
    }

    #[test]
    fn test_confirmed_ips_and_marks() {
        let (_store, records) = test_records();
        records.confirm_ip("10.0.0.1").unwrap();
        records.confirm_ip("fe80::1").unwrap();
        assert_eq!(records.confirmed_ips().unwrap().len(), 2);
        assert!(records.unconfirm_ip("10.0.0.1").unwrap());
        assert!(!records.unconfirm_ip("10.0.0.1").unwrap());

        let mut marks = BTreeMap::new();
        marks.insert("unregistered".to_string(), 2);
        records.set_marks("i-1", &marks).unwrap();
        assert_eq!(records.marks("i-1").unwrap()["unregistered"], 2);
        assert_eq!(records.marked_ids().unwrap(), vec!["i-1".to_string()]);
        records.set_marks("i-1", &BTreeMap::new()).unwrap();
        assert!(records.marked_ids().unwrap().is_empty());
    }

    #[test]
    fn test_sessions_and_metrics() {
        let (_store, records) = test_records();
        records.open_session("1.2.3.4:5000", "10.0.0.1").unwrap();
        assert_eq!(records.sessions().unwrap()["1.2.3.4:5000"], "10.0.0.1");
        records.close_session("1.2.3.4:5000").unwrap();
        assert!(records.sessions().unwrap().is_empty());

        let sample: Sample = [("rate".to_string(), (1.0, 30.0))].into();
        records.set_custom_metrics(Some(&sample)).unwrap();
        assert_eq!(records.custom_metrics().unwrap(), Some(sample.clone()));
        records.set_ip_metrics("10.0.0.1", &sample).unwrap();
        assert_eq!(records.ip_metrics().unwrap()["10.0.0.1"], sample);
    }
}
