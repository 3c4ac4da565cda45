//! Static driver registry: name -> constructor.
//!
//! Populated once at startup. A manager builds one driver per configured
//! name and advertises the names it built successfully.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use ringscale_store::{CoordinationStore, IpLocks};

use crate::error::{DriverError, DriverResult};
use crate::memory::{MemoryCloud, MemoryLoadBalancer};
use crate::traits::{CloudDriver, LoadBalancerDriver};

/// Name of the built-in in-process drivers.
pub const MEMORY_DRIVER: &str = "memory";

/// What a driver constructor gets to work with.
pub struct DriverContext {
    /// The driver name being built.
    pub name: String,
    /// The manager's configuration section for this driver.
    pub config: serde_json::Value,
    /// The building manager's uuid.
    pub manager: String,
    pub store: Arc<dyn CoordinationStore>,
}

impl DriverContext {
    /// Per-IP exclusive claims scoped to this driver.
    pub fn locks(&self) -> IpLocks {
        IpLocks::new(self.store.clone(), &self.name)
    }

    /// A boolean flag from the driver section, defaulting to false.
    pub fn flag(&self, key: &str) -> bool {
        self.config
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

pub type CloudFactory =
    Arc<dyn Fn(&DriverContext) -> DriverResult<Arc<dyn CloudDriver>> + Send + Sync>;

pub type LoadBalancerFactory =
    Arc<dyn Fn(&DriverContext) -> DriverResult<Arc<dyn LoadBalancerDriver>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct DriverRegistry {
    clouds: BTreeMap<String, CloudFactory>,
    loadbalancers: BTreeMap<String, LoadBalancerFactory>,
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in `memory` drivers. Every manager built from this
    /// registry shares one simulated cloud and gets its own load balancer.
    pub fn builtin() -> Self {
        let cloud = MemoryCloud::new();
        Self::new()
            .with_cloud(MEMORY_DRIVER, move |_| Ok(Arc::new(cloud.clone())))
            .with_loadbalancer(MEMORY_DRIVER, |ctx| {
                let lb = if ctx.flag("exclusive_ips") {
                    MemoryLoadBalancer::with_locks(ctx.locks())
                } else {
                    MemoryLoadBalancer::new()
                };
                Ok(Arc::new(lb))
            })
    }

    pub fn with_cloud<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(&DriverContext) -> DriverResult<Arc<dyn CloudDriver>> + Send + Sync + 'static,
    {
        self.clouds.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn with_loadbalancer<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(&DriverContext) -> DriverResult<Arc<dyn LoadBalancerDriver>> + Send + Sync + 'static,
    {
        self.loadbalancers.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn build_cloud(&self, ctx: &DriverContext) -> DriverResult<Arc<dyn CloudDriver>> {
        let factory = self
            .clouds
            .get(&ctx.name)
            .ok_or_else(|| DriverError::Unknown(ctx.name.clone()))?;
        let driver = factory(ctx)?;
        debug!(driver = %ctx.name, manager = %ctx.manager, "cloud driver built");
        Ok(driver)
    }

    pub fn build_loadbalancer(
        &self,
        ctx: &DriverContext,
    ) -> DriverResult<Arc<dyn LoadBalancerDriver>> {
        let factory = self
            .loadbalancers
            .get(&ctx.name)
            .ok_or_else(|| DriverError::Unknown(ctx.name.clone()))?;
        let driver = factory(ctx)?;
        debug!(driver = %ctx.name, manager = %ctx.manager, "load balancer driver built");
        Ok(driver)
    }

    pub fn cloud_names(&self) -> Vec<String> {
        self.clouds.keys().cloned().collect()
    }

    pub fn loadbalancer_names(&self) -> Vec<String> {
        self.loadbalancers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringscale_store::EmbeddedStore;

    fn test_context(name: &str) -> DriverContext {
        let store = EmbeddedStore::open_in_memory().unwrap();
        DriverContext {
            name: name.to_string(),
            config: serde_json::Value::Null,
            manager: "m1".to_string(),
            store: Arc::new(store.client().unwrap()),
        }
    }

    #[test]
    fn test_builtin_names() {
        let registry = DriverRegistry::builtin();
        assert_eq!(registry.cloud_names(), vec![MEMORY_DRIVER.to_string()]);
        assert_eq!(registry.loadbalancer_names(), vec![MEMORY_DRIVER.to_string()]);
        assert!(registry.build_cloud(&test_context(MEMORY_DRIVER)).is_ok());
        assert!(registry.build_loadbalancer(&test_context(MEMORY_DRIVER)).is_ok());
    }

    #[test]
    fn test_unknown_driver() {
        let registry = DriverRegistry::new();
        assert!(matches!(
            registry.build_cloud(&test_context("ec2")),
            Err(DriverError::Unknown(name)) if name == "ec2"
        ));
    }

    #[test]
    fn test_factory_errors_propagate() {
        let registry = DriverRegistry::new()
            .with_cloud("broken", |_| Err(DriverError::Config("missing region".to_string())));
        assert!(matches!(
            registry.build_cloud(&test_context("broken")),
            Err(DriverError::Config(_))
        ));
    }
}
