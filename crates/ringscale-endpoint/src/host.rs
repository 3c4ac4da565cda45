//! The callback surface an endpoint sees of its manager.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ringscale_core::Backend;
use ringscale_drivers::{CloudDriver, LoadBalancerDriver};

/// Services a manager lends to the endpoints it hosts.
pub trait EndpointHost: Send + Sync {
    /// The manager's cloud driver with this name, if it runs one.
    fn cloud(&self, name: &str) -> Option<Arc<dyn CloudDriver>>;

    /// The manager's load-balancer driver with this name, if it runs one.
    fn loadbalancer(&self, name: &str) -> Option<Arc<dyn LoadBalancerDriver>>;

    /// Shared table of every hosted endpoint's backends.
    fn backends(&self) -> &BackendTable;
}

/// Each hosted endpoint's current backends, grouped by ring key so that
/// endpoints sharing a URL are served together.
#[derive(Default)]
pub struct BackendTable {
    /// endpoint name -> (key, backends)
    entries: RwLock<HashMap<String, (String, Vec<Backend>)>>,
}

impl BackendTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, endpoint: &str, key: &str, backends: Vec<Backend>) {
        let mut entries = self.entries.write().expect("backends lock");
        entries.insert(endpoint.to_string(), (key.to_string(), backends));
    }

    pub fn remove(&self, endpoint: &str) -> bool {
        let mut entries = self.entries.write().expect("backends lock");
        entries.remove(endpoint).is_some()
    }

    /// Every backend published under `key`, deduplicated and sorted.
    pub fn collect(&self, key: &str) -> Vec<Backend> {
        let entries = self.entries.read().expect("backends lock");
        let mut out: Vec<Backend> = entries
            .values()
            .filter(|(k, _)| k == key)
            .flat_map(|(_, backends)| backends.iter().cloned())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// One endpoint's own backends.
    pub fn of(&self, endpoint: &str) -> Option<Vec<Backend>> {
        let entries = self.entries.read().expect("backends lock");
        entries.get(endpoint).map(|(_, backends)| backends.clone())
    }

    /// Endpoints whose backend list includes `ip`.
    pub fn endpoints_with_ip(&self, ip: &str) -> Vec<String> {
        let entries = self.entries.read().expect("backends lock");
        let mut out: Vec<String> = entries
            .iter()
            .filter(|(_, (_, backends))| backends.iter().any(|b| b.ip == ip))
            .map(|(name, _)| name.clone())
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_groups_by_key() {
        let table = BackendTable::new();
        table.publish("web-a", "k1", vec![Backend::new("10.0.0.1", Some(80), 1)]);
        table.publish("web-b", "k1", vec![
            Backend::new("10.0.0.2", Some(80), 1),
            Backend::new("10.0.0.1", Some(80), 1),
        ]);
        table.publish("api", "k2", vec![Backend::new("10.0.0.3", Some(80), 1)]);

        let shared = table.collect("k1");
        assert_eq!(shared.len(), 2);
        assert_eq!(table.collect("k2").len(), 1);
        assert_eq!(table.endpoints_with_ip("10.0.0.1"), vec!["web-a".to_string(), "web-b".to_string()]);

        assert!(table.remove("web-b"));
        assert_eq!(table.collect("k1").len(), 1);
        assert!(table.of("web-b").is_none());
    }
}
