//! The IP registration inbox, the resolved ip -> endpoint map, and
//! operator session-drop requests.

use std::collections::BTreeMap;
use std::sync::Arc;

use ringscale_core::epoch_secs;

use crate::client::{CoordinationStore, NodeKind, StoreExt};
use crate::error::StoreResult;
use crate::paths;

/// Raw IPs awaiting resolution to an endpoint.
#[derive(Clone)]
pub struct RegistrationInbox {
    store: Arc<dyn CoordinationStore>,
}

impl RegistrationInbox {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// A backend announcing itself.
    pub fn register_ip(&self, ip: &str) -> StoreResult<()> {
        self.store
            .set_string(&paths::ip_new(ip), &epoch_secs().to_string(), NodeKind::Persistent)
    }

    /// A backend going away.
    pub fn drop_ip(&self, ip: &str) -> StoreResult<()> {
        self.store
            .set_string(&paths::ip_drop(ip), &epoch_secs().to_string(), NodeKind::Persistent)
    }

    /// A load balancer seeing a backend fail.
    pub fn report_error_ip(&self, ip: &str) -> StoreResult<()> {
        self.store
            .set_string(&paths::ip_error(ip), &epoch_secs().to_string(), NodeKind::Persistent)
    }

    pub fn new_ips(&self) -> StoreResult<Vec<String>> {
        self.list(paths::IP_NEW)
    }

    pub fn dropped_ips(&self) -> StoreResult<Vec<String>> {
        self.list(paths::IP_DROP)
    }

    pub fn errored_ips(&self) -> StoreResult<Vec<String>> {
        self.list(paths::IP_ERROR)
    }

    pub fn take_new(&self, ip: &str) -> StoreResult<bool> {
        self.store.delete(&paths::ip_new(ip))
    }

    pub fn take_drop(&self, ip: &str) -> StoreResult<bool> {
        self.store.delete(&paths::ip_drop(ip))
    }

    pub fn take_error(&self, ip: &str) -> StoreResult<bool> {
        self.store.delete(&paths::ip_error(ip))
    }

    fn list(&self, root: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .store
            .children(root)?
            .iter()
            .map(|n| paths::unsegment(n))
            .collect())
    }

    // ── ip -> endpoint map ─────────────────────────────────────────

    pub fn record_ip(&self, ip: &str, endpoint: &str) -> StoreResult<()> {
        self.store
            .set_string(&paths::ip_address(ip), endpoint, NodeKind::Persistent)
    }

    pub fn endpoint_for_ip(&self, ip: &str) -> StoreResult<Option<String>> {
        self.store.get_string(&paths::ip_address(ip))
    }

    pub fn forget_ip(&self, ip: &str) -> StoreResult<bool> {
        self.store.delete(&paths::ip_address(ip))
    }

    pub fn ip_map(&self) -> StoreResult<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for name in self.store.children(paths::IP_ADDRESSES)? {
            let ip = paths::unsegment(&name);
            if let Some(endpoint) = self.endpoint_for_ip(&ip)? {
                out.insert(ip, endpoint);
            }
        }
        Ok(out)
    }
}

/// Operator requests to cut a client off from its backend.
#[derive(Clone)]
pub struct SessionDrops {
    store: Arc<dyn CoordinationStore>,
}

impl SessionDrops {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    pub fn request(&self, client: &str, backend: &str) -> StoreResult<()> {
        self.store
            .set_string(&paths::session_drop(client), backend, NodeKind::Persistent)
    }

    /// Pending requests: client -> backend.
    pub fn pending(&self) -> StoreResult<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for name in self.store.children(paths::SESSION_DROPS)? {
            let client = paths::unsegment(&name);
            if let Some(backend) = self.store.get_string(&paths::session_drop(&client))? {
                out.insert(client, backend);
            }
        }
        Ok(out)
    }

    pub fn complete(&self, client: &str) -> StoreResult<bool> {
        self.store.delete(&paths::session_drop(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedded::EmbeddedStore;

    #[test]
    fn test_inbox_round_trip() {
        let store = EmbeddedStore::open_in_memory().unwrap();
        let client: Arc<dyn CoordinationStore> = Arc::new(store.client().unwrap());
        let inbox = RegistrationInbox::new(client);

        inbox.register_ip("10.0.0.1").unwrap();
        inbox.register_ip("10.0.0.2").unwrap();
        inbox.drop_ip("10.0.0.3").unwrap();
        assert_eq!(inbox.new_ips().unwrap().len(), 2);
        assert_eq!(inbox.dropped_ips().unwrap(), vec!["10.0.0.3".to_string()]);

        assert!(inbox.take_new("10.0.0.1").unwrap());
        assert_eq!(inbox.new_ips().unwrap(), vec!["10.0.0.2".to_string()]);

        inbox.report_error_ip("10.0.0.4:8080").unwrap();
        assert_eq!(inbox.errored_ips().unwrap(), vec!["10.0.0.4:8080".to_string()]);
        assert!(inbox.take_error("10.0.0.4:8080").unwrap());
        assert!(inbox.errored_ips().unwrap().is_empty());

        inbox.record_ip("10.0.0.1", "web").unwrap();
        assert_eq!(inbox.endpoint_for_ip("10.0.0.1").unwrap().as_deref(), Some("web"));
        assert_eq!(inbox.ip_map().unwrap().len(), 1);
        inbox.forget_ip("10.0.0.1").unwrap();
        assert!(inbox.ip_map().unwrap().is_empty());
    }

    #[test]
    fn test_session_drops() {
        let store = EmbeddedStore::open_in_memory().unwrap();
        let client: Arc<dyn CoordinationStore> = Arc::new(store.client().unwrap());
        let drops = SessionDrops::new(client);
        drops.request("1.2.3.4:999", "10.0.0.1").unwrap();
        assert_eq!(drops.pending().unwrap()["1.2.3.4:999"], "10.0.0.1");
        assert!(drops.complete("1.2.3.4:999").unwrap());
        assert!(drops.pending().unwrap().is_empty());
    }
}
