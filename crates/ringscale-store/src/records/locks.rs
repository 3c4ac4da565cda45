//! Per-IP exclusive claims for load-balancer drivers.
//!
//! Drivers that bind one IP to one backend slot (a dedicated TCP port, a
//! DHCP lease) claim the IP here first. Claims are ephemeral, so a dead
//! manager releases everything it held.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::client::{CoordinationStore, NodeKind, StoreExt};
use crate::error::StoreResult;
use crate::paths;

#[derive(Clone)]
pub struct IpLocks {
    store: Arc<dyn CoordinationStore>,
    root: String,
}

impl IpLocks {
    pub fn new(store: Arc<dyn CoordinationStore>, driver: &str) -> Self {
        Self {
            store,
            root: paths::loadbalancer_locks(driver),
        }
    }

    /// Claim `ip` for `owner`. Returns false if someone else holds it.
    pub fn claim(&self, ip: &str, owner: &str) -> StoreResult<bool> {
        let claimed = self.store.create_exclusive(
            &paths::child(&self.root, ip),
            owner.as_bytes(),
            NodeKind::Ephemeral,
        )?;
        debug!(%ip, %owner, claimed, "ip lock claim");
        Ok(claimed || self.owner(ip)?.as_deref() == Some(owner))
    }

    pub fn release(&self, ip: &str) -> StoreResult<bool> {
        self.store.delete(&paths::child(&self.root, ip))
    }

    pub fn owner(&self, ip: &str) -> StoreResult<Option<String>> {
        self.store.get_string(&paths::child(&self.root, ip))
    }

    /// Every held lock: ip -> owner.
    pub fn list(&self) -> StoreResult<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for name in self.store.children(&self.root)? {
            if let Some(owner) = self.store.get_string(&format!("{}/{}", self.root, name))? {
                out.insert(paths::unsegment(&name), owner);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedded::EmbeddedStore;

    #[test]
    fn test_claim_and_release() {
        let store = EmbeddedStore::open_in_memory().unwrap();
        let a: Arc<dyn CoordinationStore> = Arc::new(store.client().unwrap());
        let b: Arc<dyn CoordinationStore> = Arc::new(store.client().unwrap());
        let locks_a = IpLocks::new(a.clone(), "tcp");
        let locks_b = IpLocks::new(b, "tcp");

        assert!(locks_a.claim("10.0.0.1", "web").unwrap());
        assert!(locks_a.claim("10.0.0.1", "web").unwrap());
        assert!(!locks_b.claim("10.0.0.1", "api").unwrap());
        assert_eq!(locks_b.owner("10.0.0.1").unwrap().as_deref(), Some("web"));
        assert_eq!(locks_b.list().unwrap().len(), 1);

        assert!(locks_a.release("10.0.0.1").unwrap());
        assert!(locks_b.claim("10.0.0.1", "api").unwrap());
    }
}
