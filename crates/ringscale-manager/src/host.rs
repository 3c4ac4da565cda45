//! The manager side of [`EndpointHost`]: built drivers and the backend
//! table shared by every hosted endpoint.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use ringscale_core::{Capabilities, ManagerConfig};
use ringscale_drivers::{
    CloudDriver, DriverContext, DriverError, DriverRegistry, LoadBalancerDriver,
};
use ringscale_endpoint::{BackendTable, EndpointHost};
use ringscale_store::CoordinationStore;

type Clouds = BTreeMap<String, Arc<dyn CloudDriver>>;
type LoadBalancers = BTreeMap<String, Arc<dyn LoadBalancerDriver>>;

#[derive(Default)]
pub struct ManagerHost {
    clouds: RwLock<Clouds>,
    loadbalancers: RwLock<LoadBalancers>,
    table: BackendTable,
}

impl ManagerHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild every configured driver, discarding the old ones. Returns
    /// the drivers that failed to build; they are left out.
    pub fn install(
        &self,
        registry: &DriverRegistry,
        config: &ManagerConfig,
        manager: &str,
        store: &Arc<dyn CoordinationStore>,
    ) -> Vec<(String, DriverError)> {
        let context = |name: &str| DriverContext {
            name: name.to_string(),
            config: config.driver_section(name),
            manager: manager.to_string(),
            store: store.clone(),
        };
        let mut failed = Vec::new();

        let mut clouds = Clouds::new();
        for name in &config.clouds {
            match registry.build_cloud(&context(name)) {
                Ok(driver) => {
                    clouds.insert(name.clone(), driver);
                }
                Err(e) => {
                    warn!(%manager, driver = %name, error = %e, "cloud driver failed to build");
                    failed.push((name.clone(), e));
                }
            }
        }

        let mut loadbalancers = LoadBalancers::new();
        for name in &config.loadbalancers {
            match registry.build_loadbalancer(&context(name)) {
                Ok(driver) => {
                    loadbalancers.insert(name.clone(), driver);
                }
                Err(e) => {
                    warn!(%manager, driver = %name, error = %e, "load balancer driver failed to build");
                    failed.push((name.clone(), e));
                }
            }
        }

        info!(
            %manager,
            clouds = clouds.len(),
            loadbalancers = loadbalancers.len(),
            "drivers installed"
        );
        *self.clouds.write().expect("clouds lock") = clouds;
        *self.loadbalancers.write().expect("loadbalancers lock") = loadbalancers;
        failed
    }

    /// Drop every driver.
    pub fn clear(&self) {
        self.clouds.write().expect("clouds lock").clear();
        self.loadbalancers.write().expect("loadbalancers lock").clear();
    }

    /// The driver names this manager can run, as advertised on the ring.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            clouds: self.clouds.read().expect("clouds lock").keys().cloned().collect(),
            loadbalancers: self
                .loadbalancers
                .read()
                .expect("loadbalancers lock")
                .keys()
                .cloned()
                .collect(),
        }
    }

    pub fn all_loadbalancers(&self) -> Vec<(String, Arc<dyn LoadBalancerDriver>)> {
        self.loadbalancers
            .read()
            .expect("loadbalancers lock")
            .iter()
            .map(|(name, lb)| (name.clone(), lb.clone()))
            .collect()
    }
}

impl EndpointHost for ManagerHost {
    fn cloud(&self, name: &str) -> Option<Arc<dyn CloudDriver>> {
        self.clouds.read().expect("clouds lock").get(name).cloned()
    }

    fn loadbalancer(&self, name: &str) -> Option<Arc<dyn LoadBalancerDriver>> {
        self.loadbalancers
            .read()
            .expect("loadbalancers lock")
            .get(name)
            .cloned()
    }

    fn backends(&self) -> &BackendTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringscale_drivers::MEMORY_DRIVER;
    use ringscale_store::EmbeddedStore;

    #[test]
    fn test_install_and_capabilities() {
        let store = EmbeddedStore::open_in_memory().unwrap();
        let client: Arc<dyn CoordinationStore> = Arc::new(store.client().unwrap());
        let host = ManagerHost::new();
        let config = ManagerConfig {
            clouds: vec![MEMORY_DRIVER.to_string()],
            loadbalancers: vec![MEMORY_DRIVER.to_string(), "nginx".to_string()],
            ..Default::default()
        };

        let failed = host.install(&DriverRegistry::builtin(), &config, "m1", &client);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "nginx");

        let caps = host.capabilities();
        assert!(caps.supports(Some(MEMORY_DRIVER), Some(MEMORY_DRIVER)));
        assert!(!caps.supports(None, Some("nginx")));
        assert!(host.cloud(MEMORY_DRIVER).is_some());
        assert_eq!(host.all_loadbalancers().len(), 1);

        host.clear();
        assert!(host.cloud(MEMORY_DRIVER).is_none());
        assert_eq!(host.capabilities(), Capabilities::default());
    }
}
