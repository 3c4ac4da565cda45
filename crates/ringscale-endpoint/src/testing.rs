//! Shared fixtures for endpoint tests.

use std::sync::Arc;

use ringscale_core::EndpointConfig;
use ringscale_drivers::{
    CloudDriver, LoadBalancerDriver, MEMORY_DRIVER, MemoryCloud, MemoryLoadBalancer,
};
use ringscale_store::{CoordinationStore, EmbeddedStore, EndpointRecords};

use crate::endpoint::Endpoint;
use crate::host::{BackendTable, EndpointHost};

/// A host running one memory cloud and one memory load balancer over an
/// in-memory store.
#[derive(Clone)]
pub(crate) struct TestHost {
    pub store: Arc<dyn CoordinationStore>,
    pub cloud: MemoryCloud,
    pub lb: MemoryLoadBalancer,
    pub table: Arc<BackendTable>,
}

impl TestHost {
    pub fn new() -> Self {
        let store = EmbeddedStore::open_in_memory().unwrap();
        Self {
            store: Arc::new(store.client().unwrap()),
            cloud: MemoryCloud::new(),
            lb: MemoryLoadBalancer::new(),
            table: Arc::new(BackendTable::new()),
        }
    }
}

impl EndpointHost for TestHost {
    fn cloud(&self, name: &str) -> Option<Arc<dyn CloudDriver>> {
        (name == MEMORY_DRIVER).then(|| Arc::new(self.cloud.clone()) as Arc<dyn CloudDriver>)
    }

    fn loadbalancer(&self, name: &str) -> Option<Arc<dyn LoadBalancerDriver>> {
        (name == MEMORY_DRIVER).then(|| Arc::new(self.lb.clone()) as Arc<dyn LoadBalancerDriver>)
    }

    fn backends(&self) -> &BackendTable {
        &self.table
    }
}

/// Memory cloud and load balancer behind `http://web.test`.
pub(crate) fn memory_config() -> EndpointConfig {
    EndpointConfig {
        url: Some("http://web.test".to_string()),
        port: Some(8080),
        cloud: Some(MEMORY_DRIVER.to_string()),
        loadbalancer: Some(MEMORY_DRIVER.to_string()),
        ..Default::default()
    }
}

/// Store `config` under `name` and open the endpoint on `host`.
pub(crate) fn open_endpoint(host: &TestHost, name: &str, config: &EndpointConfig) -> Endpoint {
    EndpointRecords::new(host.store.clone(), name)
        .set_config(config)
        .unwrap();
    let handle: Arc<dyn EndpointHost> = Arc::new(host.clone());
    Endpoint::open(host.store.clone(), name, Some(handle)).unwrap()
}
