//! In-process drivers.
//!
//! `MemoryCloud` simulates a cloud that hands out sequential `10.x.y.z`
//! addresses. `MemoryLoadBalancer` keeps backend lists in memory and
//! reports whatever metrics, pending counts and sessions it is fed. Both
//! are cheap clones over shared state, so a test (or an operator shell)
//! can keep a handle and inspect what the control plane did.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};

use ringscale_core::{
    Backend, EndpointConfig, Instance, InstanceStatus, LocalMetrics, Sample, SessionMap, StartParams,
};
use ringscale_store::IpLocks;

use crate::error::{DriverError, DriverResult};
use crate::registry::MEMORY_DRIVER;
use crate::traits::{CloudDriver, LoadBalancerDriver};

// ── Cloud ──────────────────────────────────────────────────────────

#[derive(Default)]
struct CloudState {
    /// instance id -> (endpoint, instance)
    instances: BTreeMap<String, (String, Instance)>,
    next: u64,
    fail_starts: bool,
    fail_deletes: bool,
    fail_lists: bool,
    deleted: Vec<String>,
    last_params: Option<StartParams>,
}

#[derive(Clone, Default)]
pub struct MemoryCloud {
    state: Arc<Mutex<CloudState>>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instances currently running for `endpoint`.
    pub fn instances(&self, endpoint: &str) -> Vec<Instance> {
        let state = self.state.lock().expect("cloud lock");
        state
            .instances
            .values()
            .filter(|(owner, _)| owner == endpoint)
            .map(|(_, instance)| instance.clone())
            .collect()
    }

    /// Make subsequent launches fail.
    pub fn set_fail_starts(&self, fail: bool) {
        self.state.lock().expect("cloud lock").fail_starts = fail;
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.state.lock().expect("cloud lock").fail_deletes = fail;
    }

    pub fn set_fail_lists(&self, fail: bool) {
        self.state.lock().expect("cloud lock").fail_lists = fail;
    }

    /// Replace the addresses the cloud reports for an instance.
    pub fn set_ips(&self, instance_id: &str, ips: Vec<String>) {
        let mut state = self.state.lock().expect("cloud lock");
        if let Some((_, instance)) = state.instances.get_mut(instance_id) {
            instance.ips = ips;
        }
    }

    /// Flip the status the cloud reports for an instance.
    pub fn set_status(&self, instance_id: &str, status: InstanceStatus) {
        let mut state = self.state.lock().expect("cloud lock");
        if let Some((_, instance)) = state.instances.get_mut(instance_id) {
            instance.status = status;
        }
    }

    /// Add an instance out of band, as if launched by someone else.
    pub fn insert(&self, endpoint: &str, instance: Instance) {
        let mut state = self.state.lock().expect("cloud lock");
        state
            .instances
            .insert(instance.id.clone(), (endpoint.to_string(), instance));
    }

    /// Make an instance vanish without a delete call.
    pub fn vanish(&self, instance_id: &str) -> bool {
        let mut state = self.state.lock().expect("cloud lock");
        state.instances.remove(instance_id).is_some()
    }

    /// Ids removed through `delete_instance`, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().expect("cloud lock").deleted.clone()
    }

    pub fn last_start_params(&self) -> Option<StartParams> {
        self.state.lock().expect("cloud lock").last_params.clone()
    }
}

/// Whether the endpoint asks for launches without addresses.
fn withholds_ips(config: &EndpointConfig) -> bool {
    config
        .driver_section(MEMORY_DRIVER)
        .get("assign_ips")
        .and_then(serde_json::Value::as_bool)
        .is_some_and(|assign| !assign)
}

#[async_trait]
impl CloudDriver for MemoryCloud {
    fn name(&self) -> &str {
        MEMORY_DRIVER
    }

    async fn list_instances(
        &self,
        endpoint: &str,
        _config: &EndpointConfig,
    ) -> DriverResult<Vec<Instance>> {
        if self.state.lock().expect("cloud lock").fail_lists {
            return Err(DriverError::Cloud("list failed".to_string()));
        }
        Ok(self.instances(endpoint))
    }

    async fn start_instance(
        &self,
        endpoint: &str,
        config: &EndpointConfig,
        params: &StartParams,
    ) -> DriverResult<Instance> {
        let mut state = self.state.lock().expect("cloud lock");
        state.last_params = Some(params.clone());
        if state.fail_starts {
            return Err(DriverError::Cloud("capacity exhausted".to_string()));
        }
        state.next += 1;
        let n = state.next;
        let ips = if withholds_ips(config) {
            Vec::new()
        } else {
            vec![format!("10.{}.{}.{}", (n >> 16) & 0xff, (n >> 8) & 0xff, n & 0xff)]
        };
        let instance = Instance::new(format!("mem-{n}"), format!("{endpoint}-{n}"), ips);
        state
            .instances
            .insert(instance.id.clone(), (endpoint.to_string(), instance.clone()));
        debug!(%endpoint, id = %instance.id, "memory instance started");
        Ok(instance)
    }

    async fn delete_instance(
        &self,
        endpoint: &str,
        _config: &EndpointConfig,
        instance_id: &str,
    ) -> DriverResult<()> {
        let mut state = self.state.lock().expect("cloud lock");
        if state.fail_deletes {
            return Err(DriverError::Cloud("delete refused".to_string()));
        }
        match state.instances.remove(instance_id) {
            Some(_) => {
                state.deleted.push(instance_id.to_string());
                debug!(%endpoint, id = %instance_id, "memory instance deleted");
                Ok(())
            }
            None => Err(DriverError::InstanceNotFound(instance_id.to_string())),
        }
    }
}

// ── Load balancer ──────────────────────────────────────────────────

#[derive(Default)]
struct LbState {
    staged: HashMap<String, Vec<Backend>>,
    live: HashMap<String, Vec<Backend>>,
    saves: usize,
    metrics: LocalMetrics,
    pending: HashMap<String, u64>,
    sessions: SessionMap,
    dropped_sessions: Vec<(String, String)>,
    dropped_ips: Vec<String>,
    cleaned: Vec<String>,
}

#[derive(Clone, Default)]
pub struct MemoryLoadBalancer {
    state: Arc<Mutex<LbState>>,
    locks: Option<IpLocks>,
}

impl MemoryLoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind each backend IP to at most one URL.
    pub fn with_locks(locks: IpLocks) -> Self {
        Self {
            state: Arc::default(),
            locks: Some(locks),
        }
    }

    /// The saved backend list for `url`.
    pub fn backends(&self, url: &str) -> Vec<Backend> {
        let state = self.state.lock().expect("lb lock");
        state.live.get(url).cloned().unwrap_or_default()
    }

    pub fn saves(&self) -> usize {
        self.state.lock().expect("lb lock").saves
    }

    pub fn set_metrics(&self, ip: &str, sample: Sample) {
        self.state
            .lock()
            .expect("lb lock")
            .metrics
            .insert(ip.to_string(), sample);
    }

    pub fn clear_metrics(&self) {
        self.state.lock().expect("lb lock").metrics.clear();
    }

    pub fn set_pending(&self, url: &str, count: u64) {
        self.state
            .lock()
            .expect("lb lock")
            .pending
            .insert(url.to_string(), count);
    }

    pub fn set_sessions(&self, sessions: SessionMap) {
        self.state.lock().expect("lb lock").sessions = sessions;
    }

    pub fn dropped_sessions(&self) -> Vec<(String, String)> {
        self.state.lock().expect("lb lock").dropped_sessions.clone()
    }

    pub fn dropped_ips(&self) -> Vec<String> {
        self.state.lock().expect("lb lock").dropped_ips.clone()
    }

    /// Instance names passed to `cleanup`.
    pub fn cleaned(&self) -> Vec<String> {
        self.state.lock().expect("lb lock").cleaned.clone()
    }
}

#[async_trait]
impl LoadBalancerDriver for MemoryLoadBalancer {
    fn name(&self) -> &str {
        MEMORY_DRIVER
    }

    async fn change(
        &self,
        url: &str,
        backends: &[Backend],
        _config: &EndpointConfig,
    ) -> DriverResult<()> {
        let mut accepted = Vec::with_capacity(backends.len());
        for backend in backends {
            if let Some(locks) = &self.locks {
                if !locks.claim(&backend.ip, url)? {
                    warn!(%url, ip = %backend.ip, "backend ip bound to another url, skipping");
                    continue;
                }
            }
            accepted.push(backend.clone());
        }
        accepted.sort();
        accepted.dedup();
        let mut state = self.state.lock().expect("lb lock");
        state.staged.insert(url.to_string(), accepted);
        Ok(())
    }

    async fn save(&self) -> DriverResult<()> {
        let mut state = self.state.lock().expect("lb lock");
        let staged: Vec<(String, Vec<Backend>)> = state.staged.drain().collect();
        for (url, backends) in staged {
            state.live.insert(url, backends);
        }
        state.saves += 1;
        Ok(())
    }

    async fn metrics(&self) -> DriverResult<LocalMetrics> {
        Ok(self.state.lock().expect("lb lock").metrics.clone())
    }

    async fn pending(&self) -> DriverResult<HashMap<String, u64>> {
        Ok(self.state.lock().expect("lb lock").pending.clone())
    }

    async fn sessions(&self) -> DriverResult<SessionMap> {
        Ok(self.state.lock().expect("lb lock").sessions.clone())
    }

    async fn drop_session(&self, client: &str, backend: &str) -> DriverResult<()> {
        let mut state = self.state.lock().expect("lb lock");
        if let Some(clients) = state.sessions.get_mut(backend) {
            clients.retain(|c| c != client);
        }
        state
            .dropped_sessions
            .push((client.to_string(), backend.to_string()));
        Ok(())
    }

    async fn cleanup(&self, _config: &EndpointConfig, instance_name: &str) -> DriverResult<()> {
        self.state
            .lock()
            .expect("lb lock")
            .cleaned
            .push(instance_name.to_string());
        Ok(())
    }

    async fn dropped(&self, ip: &str) -> DriverResult<()> {
        if let Some(locks) = &self.locks {
            locks.release(ip)?;
        }
        self.state
            .lock()
            .expect("lb lock")
            .dropped_ips
            .push(ip.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringscale_store::{CoordinationStore, EmbeddedStore};

    #[tokio::test]
    async fn test_cloud_lifecycle() {
        let cloud = MemoryCloud::new();
        let config = EndpointConfig::default();
        let a = cloud.start_instance("web", &config, &StartParams::new()).await.unwrap();
        let b = cloud.start_instance("api", &config, &StartParams::new()).await.unwrap();
        assert_eq!(a.ips, vec!["10.0.0.1".to_string()]);
        assert_eq!(b.ips, vec!["10.0.0.2".to_string()]);
        assert_eq!(cloud.list_instances("web", &config).await.unwrap(), vec![a.clone()]);

        cloud.delete_instance("web", &config, &a.id).await.unwrap();
        assert!(cloud.instances("web").is_empty());
        assert_eq!(cloud.deleted(), vec![a.id.clone()]);
        assert!(matches!(
            cloud.delete_instance("web", &config, &a.id).await,
            Err(DriverError::InstanceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cloud_failures() {
        let cloud = MemoryCloud::new();
        let config = EndpointConfig::default();
        cloud.set_fail_starts(true);
        assert!(cloud.start_instance("web", &config, &StartParams::new()).await.is_err());
        assert!(cloud.instances("web").is_empty());

        cloud.set_fail_lists(true);
        assert!(cloud.list_instances("web", &config).await.is_err());
    }

    #[tokio::test]
    async fn test_cloud_reports_status() {
        let cloud = MemoryCloud::new();
        let config = EndpointConfig::default();
        let a = cloud.start_instance("web", &config, &StartParams::new()).await.unwrap();
        assert!(!a.is_errored());
        cloud.set_status(&a.id, InstanceStatus::Error);
        let listed = cloud.list_instances("web", &config).await.unwrap();
        assert!(listed[0].is_errored());
    }

    #[tokio::test]
    async fn test_cloud_can_withhold_ips() {
        let cloud = MemoryCloud::new();
        let mut config = EndpointConfig::default();
        config
            .drivers
            .insert(MEMORY_DRIVER.to_string(), serde_json::json!({ "assign_ips": false }));
        let instance = cloud.start_instance("web", &config, &StartParams::new()).await.unwrap();
        assert!(instance.ips.is_empty());
    }

    #[tokio::test]
    async fn test_lb_change_is_applied_on_save() {
        let lb = MemoryLoadBalancer::new();
        let config = EndpointConfig::default();
        let backends = vec![Backend::new("10.0.0.2", Some(80), 1), Backend::new("10.0.0.1", Some(80), 1)];
        lb.change("http://web", &backends, &config).await.unwrap();
        assert!(lb.backends("http://web").is_empty());
        lb.save().await.unwrap();
        let live = lb.backends("http://web");
        assert_eq!(live.len(), 2);
        assert_eq!(live[0].ip, "10.0.0.1");
        assert_eq!(lb.saves(), 1);
    }

    #[tokio::test]
    async fn test_lb_exclusive_ips() {
        let store = EmbeddedStore::open_in_memory().unwrap();
        let client: Arc<dyn CoordinationStore> = Arc::new(store.client().unwrap());
        let lb = MemoryLoadBalancer::with_locks(IpLocks::new(client, MEMORY_DRIVER));
        let config = EndpointConfig::default();
        let shared = vec![Backend::new("10.0.0.1", None, 1)];

        lb.change("http://a", &shared, &config).await.unwrap();
        lb.change("http://b", &shared, &config).await.unwrap();
        lb.save().await.unwrap();
        assert_eq!(lb.backends("http://a").len(), 1);
        assert!(lb.backends("http://b").is_empty());

        lb.dropped("10.0.0.1").await.unwrap();
        lb.change("http://b", &shared, &config).await.unwrap();
        lb.save().await.unwrap();
        assert_eq!(lb.backends("http://b").len(), 1);
        assert_eq!(lb.dropped_ips(), vec!["10.0.0.1".to_string()]);
    }

    #[tokio::test]
    async fn test_lb_sessions() {
        let lb = MemoryLoadBalancer::new();
        lb.set_sessions(HashMap::from([(
            "10.0.0.1".to_string(),
            vec!["1.1.1.1:100".to_string(), "2.2.2.2:200".to_string()],
        )]));
        lb.drop_session("1.1.1.1:100", "10.0.0.1").await.unwrap();
        assert_eq!(lb.sessions().await.unwrap()["10.0.0.1"], vec!["2.2.2.2:200".to_string()]);
        assert_eq!(lb.dropped_sessions().len(), 1);
    }
}
