//! The scale manager: one member of a ringscale fleet.
//!
//! A manager hosts every endpoint in the store. Each tick it refreshes
//! every endpoint's backends on its own load balancers, and runs the
//! health check and update only for the endpoints it owns on the ring.
//! Store watches keep the ring, the endpoint set, configuration, state
//! and the registration inbox current between ticks.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::Instant;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use ringscale_cluster::{Aggregator, Membership, OwnershipCache, Ring, to_merged};
use ringscale_core::{Capabilities, ManagerConfig, MergedMetrics, SessionMap, ip_of, sha_hash};
use ringscale_drivers::DriverRegistry;
use ringscale_endpoint::{Endpoint, EndpointError, EndpointHost, EndpointResult, UpdateOutcome};
use ringscale_store::{
    CoordinationStore, EndpointDirectory, ManagerRecords, RegistrationInbox, SessionDrops,
    WatchEvent, WatchKind, paths,
};

use crate::error::{ManagerError, ManagerResult};
use crate::events::ManagerEvent;
use crate::host::ManagerHost;

/// An endpoint as shared between the manager and its tick tasks.
pub type SharedEndpoint = Arc<Mutex<Endpoint>>;

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Endpoints hosted by this manager.
    pub endpoints: usize,
    /// Update outcomes of the endpoints this manager owns.
    pub outcomes: BTreeMap<String, UpdateOutcome>,
    /// Endpoints whose tick failed.
    pub failed: Vec<String>,
    /// Active connections across owned endpoints.
    pub active: u64,
}

/// What the local load balancers observed this tick.
#[derive(Default)]
struct Observed {
    metrics: MergedMetrics,
    pending: HashMap<String, u64>,
    sessions: SessionMap,
}

struct ManagerState {
    serving: bool,
    config: ManagerConfig,
    url: Option<String>,
    membership: Membership,
    ring: Ring,
    capabilities: HashMap<String, Capabilities>,
    ownership: OwnershipCache,
    endpoints: BTreeMap<String, SharedEndpoint>,
    /// Sessions seen on the local load balancers last tick.
    sessions: SessionMap,
    watcher: Option<JoinHandle<()>>,
}

pub struct ScaleManager {
    uuid: String,
    names: Vec<String>,
    store: Arc<dyn CoordinationStore>,
    registry: DriverRegistry,
    host: Arc<ManagerHost>,
    records: ManagerRecords,
    directory: EndpointDirectory,
    inbox: RegistrationInbox,
    drops: SessionDrops,
    state: Mutex<ManagerState>,
    stop_tx: watch::Sender<bool>,
}

impl ScaleManager {
    /// A manager serving under `names`, with a fresh uuid and the built-in
    /// driver registry.
    pub fn new(store: Arc<dyn CoordinationStore>, names: Vec<String>) -> Self {
        let uuid = uuid::Uuid::new_v4().to_string();
        let (stop_tx, _) = watch::channel(false);
        Self {
            state: Mutex::new(ManagerState {
                serving: false,
                config: ManagerConfig::default(),
                url: None,
                membership: Membership::new(store.clone(), &uuid, names.clone()),
                ring: Ring::default(),
                capabilities: HashMap::new(),
                ownership: OwnershipCache::new(),
                endpoints: BTreeMap::new(),
                sessions: SessionMap::new(),
                watcher: None,
            }),
            records: ManagerRecords::new(store.clone()),
            directory: EndpointDirectory::new(store.clone()),
            inbox: RegistrationInbox::new(store.clone()),
            drops: SessionDrops::new(store.clone()),
            registry: DriverRegistry::builtin(),
            host: Arc::new(ManagerHost::new()),
            uuid,
            names,
            store,
            stop_tx,
        }
    }

    pub fn with_registry(mut self, registry: DriverRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Pin the manager's uuid instead of generating one.
    pub fn with_uuid(mut self, uuid: &str) -> Self {
        self.uuid = uuid.to_string();
        self.state.get_mut().membership =
            Membership::new(self.store.clone(), uuid, self.names.clone());
        self
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn host(&self) -> &Arc<ManagerHost> {
        &self.host
    }

    pub async fn is_serving(&self) -> bool {
        self.state.lock().await.serving
    }

    /// The merged configuration currently in effect.
    pub async fn config(&self) -> ManagerConfig {
        self.state.lock().await.config.clone()
    }

    /// Ring tokens held by this manager.
    pub async fn keys(&self) -> Vec<String> {
        self.state.lock().await.membership.keys().to_vec()
    }

    pub async fn ring(&self) -> Ring {
        self.state.lock().await.ring.clone()
    }

    pub async fn endpoint_names(&self) -> Vec<String> {
        self.state.lock().await.endpoints.keys().cloned().collect()
    }

    pub async fn endpoint(&self, name: &str) -> Option<SharedEndpoint> {
        self.state.lock().await.endpoints.get(name).cloned()
    }

    /// Names of the endpoints this manager currently owns.
    pub async fn owned(&self) -> Vec<String> {
        self.snapshot().await.1.into_iter().collect()
    }

    fn log(&self, event: ManagerEvent) {
        for name in &self.names {
            if let Err(e) = self.records.log(name).append(event.severity(), event.to_string()) {
                warn!(manager = %self.uuid, error = %e, "failed to append to manager log");
            }
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Connect, register on the ring and arm every watch.
    pub async fn serve(self: &Arc<Self>) -> ManagerResult<()> {
        self.store.connect()?;
        if let Some(events) = self.store.take_events() {
            let handle = tokio::spawn(dispatch(Arc::downgrade(self), events));
            self.state.lock().await.watcher = Some(handle);
        }
        self.register().await?;
        self.state.lock().await.serving = true;
        self.arm_watches().await?;
        info!(manager = %self.uuid, names = ?self.names, "manager serving");
        Ok(())
    }

    /// Serve, then tick every configured interval until `shutdown` fires
    /// or [`ScaleManager::stop`] is called. Only a failure to start
    /// serving is returned; tick failures are logged and retried.
    pub async fn run(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> ManagerResult<()> {
        self.serve().await?;
        let mut stopped = self.stop_tx.subscribe();
        loop {
            if *stopped.borrow() {
                break;
            }
            let started = Instant::now();
            let interval = self.state.lock().await.config.interval();
            let mut pause = interval;
            match self.tick().await {
                Ok(report) => debug!(
                    manager = %self.uuid,
                    endpoints = report.endpoints,
                    owned = report.outcomes.len(),
                    failed = report.failed.len(),
                    active = report.active,
                    "tick complete"
                ),
                Err(e) if e.is_transient() => {
                    warn!(manager = %self.uuid, error = %e, "store session lost, re-registering");
                    if let Err(e) = self.recover().await {
                        error!(manager = %self.uuid, error = %e, "re-register failed");
                    }
                    pause += interval;
                }
                Err(e) => error!(manager = %self.uuid, error = %e, "tick failed"),
            }
            let pause = pause.saturating_sub(started.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => break,
                _ = stopped.changed() => break,
            }
        }
        self.unserve().await
    }

    /// Ask a running loop to exit after its current tick.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Reconnect after a lost session and restore everything the session
    /// took with it.
    pub async fn recover(&self) -> ManagerResult<()> {
        self.store.connect()?;
        self.register().await?;
        self.arm_watches().await?;
        self.log(ManagerEvent::Reconnected {
            uuid: self.uuid.clone(),
        });
        Ok(())
    }

    /// Withdraw from the ring and release every hosted endpoint.
    pub async fn unserve(&self) -> ManagerResult<()> {
        let endpoints = {
            let mut state = self.state.lock().await;
            if !state.serving {
                return Ok(());
            }
            state.serving = false;
            std::mem::take(&mut state.endpoints)
        };
        self.store.unwatch_all();
        for endpoint in endpoints.into_values() {
            let mut endpoint = endpoint.lock().await;
            if endpoint.records().manager()?.as_deref() == Some(self.uuid.as_str()) {
                endpoint.records().clear_manager()?;
            }
            endpoint.detach();
        }
        self.state.lock().await.membership.unregister()?;
        self.host.clear();
        self.log(ManagerEvent::Unregistered {
            uuid: self.uuid.clone(),
        });
        info!(manager = %self.uuid, "manager stopped serving");
        Ok(())
    }

    /// Rebuild drivers from the merged configuration and publish ring
    /// tokens and capabilities.
    pub async fn register(&self) -> ManagerResult<()> {
        let config = self.records.merged_config(&self.names)?;
        config.validate()?;
        let url = self.records.url()?;
        for (driver, error) in self
            .host
            .install(&self.registry, &config, &self.uuid, &self.store)
        {
            self.log(ManagerEvent::DriverFailed {
                driver,
                error: error.to_string(),
            });
        }

        let keys = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            state.membership.register(config.keys, self.host.capabilities())?;
            state.config = config;
            state.url = url;
            state.ownership.invalidate_all();
            state.membership.keys().len()
        };
        self.refresh_ring().await?;
        self.log(ManagerEvent::Registered {
            uuid: self.uuid.clone(),
            keys,
        });
        Ok(())
    }

    // ── Watches ────────────────────────────────────────────────────
    //
    // Watches are armed without holding the state lock. Each handler
    // re-arms first and applies what it read afterwards.

    async fn arm_watches(&self) -> ManagerResult<()> {
        for name in &self.names {
            self.store.watch_data(&paths::manager_config(name))?;
        }
        self.store.watch_data(paths::URL)?;
        self.watch_ring().await?;
        self.watch_endpoints().await?;
        self.watch_inbox().await
    }

    async fn on_watch(&self, event: &WatchEvent) -> ManagerResult<()> {
        if !self.state.lock().await.serving {
            return Ok(());
        }
        debug!(manager = %self.uuid, path = %event.path, kind = ?event.kind, "watch fired");
        match (event.kind, event.path.as_str()) {
            (WatchKind::Children, paths::MANAGER_KEYS | paths::MANAGER_INFO) => {
                self.watch_ring().await
            }
            (WatchKind::Children, paths::ENDPOINTS) => self.watch_endpoints().await,
            (WatchKind::Children, paths::IP_NEW | paths::IP_DROP | paths::IP_ERROR) => {
                self.watch_inbox().await
            }
            (WatchKind::Data, paths::URL) => self.watch_url().await,
            (WatchKind::Data, path)
                if self.names.iter().any(|n| paths::manager_config(n) == path) =>
            {
                self.watch_config().await
            }
            (WatchKind::Data, path) => self.watch_endpoint(path).await,
            _ => Ok(()),
        }
    }

    async fn watch_ring(&self) -> ManagerResult<()> {
        self.store.watch_children(paths::MANAGER_KEYS)?;
        self.store.watch_children(paths::MANAGER_INFO)?;
        self.refresh_ring().await
    }

    async fn watch_config(&self) -> ManagerResult<()> {
        for name in &self.names {
            self.store.watch_data(&paths::manager_config(name))?;
        }
        let config = self.records.merged_config(&self.names)?;
        if config != self.state.lock().await.config {
            info!(manager = %self.uuid, "manager configuration changed");
            self.register().await?;
        }
        Ok(())
    }

    async fn watch_url(&self) -> ManagerResult<()> {
        self.store.watch_data(paths::URL)?;
        let url = self.records.url()?;
        if url != self.state.lock().await.url {
            info!(manager = %self.uuid, url = ?url, "fleet url changed");
            self.register().await?;
        }
        Ok(())
    }

    async fn watch_endpoints(&self) -> ManagerResult<()> {
        self.store.watch_children(paths::ENDPOINTS)?;
        self.sync_endpoints().await
    }

    async fn watch_inbox(&self) -> ManagerResult<()> {
        self.store.watch_children(paths::IP_NEW)?;
        self.store.watch_children(paths::IP_DROP)?;
        self.store.watch_children(paths::IP_ERROR)?;
        self.process_inbox().await
    }

    /// An endpoint's config or state node changed.
    async fn watch_endpoint(&self, path: &str) -> ManagerResult<()> {
        let found = {
            let state = self.state.lock().await;
            state
                .endpoints
                .iter()
                .find(|(name, _)| {
                    paths::endpoint_config(name) == path || paths::endpoint_state(name) == path
                })
                .map(|(name, endpoint)| (name.clone(), endpoint.clone()))
        };
        let Some((name, endpoint)) = found else {
            return Ok(());
        };
        self.store.watch_data(path)?;

        if path == paths::endpoint_config(&name) {
            let (before, after, placement) = {
                let mut endpoint = endpoint.lock().await;
                let before = endpoint.key();
                let placement = endpoint.reload_config().await?;
                (before, endpoint.key(), placement)
            };
            if placement {
                let mut state = self.state.lock().await;
                state.ownership.invalidate(&before);
                state.ownership.invalidate(&after);
                debug!(manager = %self.uuid, endpoint = %name, "endpoint placement changed");
            }
        } else {
            let state = endpoint.lock().await.reload_state()?;
            debug!(manager = %self.uuid, endpoint = %name, %state, "endpoint state reloaded");
        }
        Ok(())
    }

    // ── Ring and endpoints ─────────────────────────────────────────

    /// Re-read ring tokens and capabilities, dropping cached owners if
    /// either changed.
    async fn refresh_ring(&self) -> ManagerResult<()> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let ring = state.membership.ring()?;
        let capabilities = state.membership.capabilities()?;
        if ring == state.ring && capabilities == state.capabilities {
            return Ok(());
        }
        let event = ManagerEvent::RingChanged {
            tokens: ring.len(),
            managers: ring.managers().len(),
        };
        state.ring = ring;
        state.capabilities = capabilities;
        state.ownership.invalidate_all();
        drop(guard);
        self.log(event);
        Ok(())
    }

    /// Bring the hosted endpoints in line with the store: open new ones,
    /// release deleted ones and those flagged for deletion.
    async fn sync_endpoints(&self) -> ManagerResult<()> {
        let listed: BTreeSet<String> = self.directory.list()?.into_iter().collect();
        let known: BTreeSet<String> = self.state.lock().await.endpoints.keys().cloned().collect();

        let mut gone: Vec<String> = known.difference(&listed).cloned().collect();
        for name in known.intersection(&listed) {
            if self.directory.records(name).is_deleting()? {
                gone.push(name.clone());
            }
        }

        let mut added = Vec::new();
        for name in listed.difference(&known) {
            let records = self.directory.records(name);
            if records.is_deleting()? || records.config()?.is_none() {
                continue;
            }
            let host: Arc<dyn EndpointHost> = self.host.clone();
            let endpoint = match Endpoint::open(self.store.clone(), name, Some(host)) {
                Ok(endpoint) => endpoint,
                Err(EndpointError::Config(e)) => {
                    warn!(
                        manager = %self.uuid,
                        endpoint = %name,
                        error = %e,
                        "skipping endpoint with invalid config"
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            self.store.watch_data(&paths::endpoint_config(name))?;
            self.store.watch_data(&paths::endpoint_state(name))?;
            added.push((name.clone(), endpoint));
        }

        let released: Vec<(String, SharedEndpoint)> = {
            let mut state = self.state.lock().await;
            for (name, endpoint) in added {
                if !state.endpoints.contains_key(&name) {
                    state
                        .endpoints
                        .insert(name.clone(), Arc::new(Mutex::new(endpoint)));
                    info!(manager = %self.uuid, endpoint = %name, "endpoint added");
                }
            }
            gone.into_iter()
                .filter_map(|name| state.endpoints.remove(&name).map(|e| (name, e)))
                .collect()
        };
        for (name, endpoint) in released {
            self.release(&name, endpoint).await;
        }
        Ok(())
    }

    /// Withdraw an endpoint's backends, give up its manager marker and
    /// detach it.
    async fn release(&self, name: &str, endpoint: SharedEndpoint) {
        let mut endpoint = endpoint.lock().await;
        match endpoint.stage_backends(true).await {
            Ok(Some(lb)) => {
                if let Err(e) = lb.save().await {
                    warn!(manager = %self.uuid, endpoint = %name, error = %e, "load balancer save failed");
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(manager = %self.uuid, endpoint = %name, error = %e, "failed to withdraw backends")
            }
        }
        let records = endpoint.records();
        if records.manager().ok().flatten().as_deref() == Some(self.uuid.as_str()) {
            if let Err(e) = records.clear_manager() {
                warn!(manager = %self.uuid, endpoint = %name, error = %e, "failed to release endpoint");
            }
        }
        endpoint.detach();
        self.log(ManagerEvent::EndpointRemoved {
            name: name.to_string(),
        });
    }

    /// Every hosted endpoint, and the names of those this manager owns.
    async fn snapshot(&self) -> (BTreeMap<String, SharedEndpoint>, BTreeSet<String>) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let mut owned = BTreeSet::new();
        for (name, endpoint) in &state.endpoints {
            let (key, cloud, loadbalancer) = {
                let endpoint = endpoint.lock().await;
                let config = endpoint.config();
                (endpoint.key(), config.cloud.clone(), config.loadbalancer.clone())
            };
            let owner = state.ownership.owner(
                &state.ring,
                &key,
                cloud.as_deref(),
                loadbalancer.as_deref(),
                &state.capabilities,
            );
            if owner.as_deref() == Some(self.uuid.as_str()) {
                owned.insert(name.clone());
            }
        }
        (state.endpoints.clone(), owned)
    }

    // ── Registration inbox ─────────────────────────────────────────

    /// Resolve and remove the inbox entries this manager owns. An entry
    /// is owned by the ring owner of the IP's hash, so exactly one live
    /// manager consumes it.
    pub async fn process_inbox(&self) -> ManagerResult<()> {
        let new_ips = self.inbox.new_ips()?;
        let dropped_ips = self.inbox.dropped_ips()?;
        let errored_ips = self.inbox.errored_ips()?;
        if new_ips.is_empty() && dropped_ips.is_empty() && errored_ips.is_empty() {
            return Ok(());
        }
        let (new_ips, dropped_ips, errored_ips, endpoints) = {
            let state = self.state.lock().await;
            let mine = |ip: &String| {
                state
                    .ring
                    .resolve_owner(&sha_hash(ip), None, None, &state.capabilities)
                    == Some(self.uuid.as_str())
            };
            let new_ips: Vec<String> = new_ips.into_iter().filter(mine).collect();
            let dropped_ips: Vec<String> = dropped_ips.into_iter().filter(mine).collect();
            let errored_ips: Vec<String> = errored_ips
                .into_iter()
                .filter(|raw| mine(&ip_of(raw).to_string()))
                .collect();
            (new_ips, dropped_ips, errored_ips, state.endpoints.clone())
        };

        for ip in new_ips {
            let mut resolved = None;
            for (name, endpoint) in &endpoints {
                let endpoint = endpoint.lock().await;
                if endpoint.ip_confirmed(&ip)? {
                    self.inbox.record_ip(&ip, name)?;
                    if let Err(e) = endpoint.refresh_backends().await {
                        warn!(manager = %self.uuid, endpoint = %name, error = %e, "backend refresh failed");
                    }
                    resolved = Some(name.clone());
                    break;
                }
            }
            self.inbox.take_new(&ip)?;
            self.log(match resolved {
                Some(endpoint) => ManagerEvent::IpResolved { ip, endpoint },
                None => ManagerEvent::IpUnresolved { ip },
            });
        }

        for ip in dropped_ips {
            let mut dropped_from = None;
            for (name, endpoint) in &endpoints {
                let endpoint = endpoint.lock().await;
                if endpoint.ip_dropped(&ip)? {
                    if let Err(e) = endpoint.refresh_backends().await {
                        warn!(manager = %self.uuid, endpoint = %name, error = %e, "backend refresh failed");
                    }
                    dropped_from = Some(name.clone());
                    break;
                }
            }
            self.inbox.forget_ip(&ip)?;
            self.inbox.take_drop(&ip)?;
            for (driver, lb) in self.host.all_loadbalancers() {
                if let Err(e) = lb.dropped(&ip).await {
                    warn!(manager = %self.uuid, %driver, %ip, error = %e, "load balancer drop notice failed");
                }
            }
            self.log(ManagerEvent::IpDropped {
                ip,
                endpoint: dropped_from,
            });
        }

        for reported in errored_ips {
            let ip = ip_of(&reported);
            let mut owner = None;
            for (name, endpoint) in &endpoints {
                let endpoint = endpoint.lock().await;
                if endpoint.ip_errored(ip).await? {
                    if let Err(e) = endpoint.refresh_backends().await {
                        warn!(manager = %self.uuid, endpoint = %name, error = %e, "backend refresh failed");
                    }
                    owner = Some(name.clone());
                    break;
                }
            }
            self.inbox.take_error(&reported)?;
            self.log(ManagerEvent::IpErrored {
                ip: ip.to_string(),
                endpoint: owner,
            });
        }
        Ok(())
    }

    /// Keep `ip-addresses` in line with the confirmed IPs of owned
    /// endpoints: add missing entries, prune stale ones.
    async fn check_endpoint_ips(
        &self,
        endpoints: &BTreeMap<String, SharedEndpoint>,
        owned: &BTreeSet<String>,
    ) -> ManagerResult<()> {
        let map = self.inbox.ip_map()?;
        let listed: BTreeSet<String> = self.directory.list()?.into_iter().collect();

        let mut confirmed: HashMap<&str, BTreeSet<String>> = HashMap::new();
        for name in owned {
            let Some(endpoint) = endpoints.get(name) else {
                continue;
            };
            let ips = endpoint.lock().await.records().confirmed_ips()?;
            for ip in &ips {
                if map.get(ip) != Some(name) {
                    self.inbox.record_ip(ip, name)?;
                    debug!(manager = %self.uuid, endpoint = %name, %ip, "ip mapping restored");
                }
            }
            confirmed.insert(name.as_str(), ips);
        }

        for (ip, name) in &map {
            let stale = !listed.contains(name)
                || confirmed
                    .get(name.as_str())
                    .is_some_and(|ips| !ips.contains(ip));
            if stale {
                self.inbox.forget_ip(ip)?;
                debug!(manager = %self.uuid, endpoint = %name, %ip, "stale ip mapping pruned");
            }
        }
        Ok(())
    }

    // ── Load-balancer observations ─────────────────────────────────

    async fn observe(&self) -> Observed {
        let mut observed = Observed::default();
        for (driver, lb) in self.host.all_loadbalancers() {
            match lb.metrics().await {
                Ok(metrics) => {
                    for (ip, samples) in to_merged(&metrics) {
                        observed.metrics.entry(ip).or_default().extend(samples);
                    }
                }
                Err(e) => warn!(manager = %self.uuid, %driver, error = %e, "metrics unavailable"),
            }
            match lb.pending().await {
                Ok(pending) => {
                    for (url, count) in pending {
                        *observed.pending.entry(url).or_insert(0) += count;
                    }
                }
                Err(e) => warn!(manager = %self.uuid, %driver, error = %e, "pending counts unavailable"),
            }
            match lb.sessions().await {
                Ok(sessions) => {
                    for (backend, clients) in sessions {
                        observed.sessions.entry(backend).or_default().extend(clients);
                    }
                }
                Err(e) => warn!(manager = %self.uuid, %driver, error = %e, "sessions unavailable"),
            }
        }
        observed
    }

    /// The endpoint serving `backend`: the recorded IP mapping, or the
    /// only endpoint listing that IP among its backends.
    fn backend_endpoint(&self, backend: &str, ip_map: &BTreeMap<String, String>) -> Option<String> {
        let ip = ip_of(backend);
        if let Some(name) = ip_map.get(ip) {
            return Some(name.clone());
        }
        let mut names = self.host.backends().endpoints_with_ip(ip);
        if names.len() == 1 { names.pop() } else { None }
    }

    /// Report session changes to the endpoints serving them and carry out
    /// operator drop requests.
    async fn track_sessions(
        &self,
        current: SessionMap,
        endpoints: &BTreeMap<String, SharedEndpoint>,
        owned: &BTreeSet<String>,
    ) -> ManagerResult<()> {
        fn pairs(map: &SessionMap) -> BTreeSet<(String, String)> {
            map.iter()
                .flat_map(|(backend, clients)| {
                    clients.iter().map(move |c| (c.clone(), backend.clone()))
                })
                .collect()
        }
        let now = pairs(&current);
        let before = pairs(&std::mem::replace(
            &mut self.state.lock().await.sessions,
            current,
        ));
        let ip_map = self.inbox.ip_map()?;

        for (client, backend) in now.difference(&before) {
            let endpoint = self
                .backend_endpoint(backend, &ip_map)
                .and_then(|name| endpoints.get(&name));
            if let Some(endpoint) = endpoint {
                endpoint.lock().await.session_opened(client, backend)?;
            }
        }
        for (client, backend) in before.difference(&now) {
            let endpoint = self
                .backend_endpoint(backend, &ip_map)
                .and_then(|name| endpoints.get(&name));
            if let Some(endpoint) = endpoint {
                endpoint.lock().await.session_closed(client)?;
            }
        }

        for (client, backend) in self.drops.pending()? {
            for (driver, lb) in self.host.all_loadbalancers() {
                if let Err(e) = lb.drop_session(&client, &backend).await {
                    warn!(manager = %self.uuid, %driver, %client, error = %e, "session drop failed");
                }
            }
            let serving = self.backend_endpoint(&backend, &ip_map);
            if serving.is_none_or(|name| owned.contains(&name)) {
                self.drops.complete(&client)?;
                self.log(ManagerEvent::SessionDropped { client, backend });
            }
        }
        Ok(())
    }

    // ── Tick ───────────────────────────────────────────────────────

    /// One pass of the control loop.
    ///
    /// Every hosted endpoint stages its backends on this manager's load
    /// balancers; owned endpoints also run their health check and update.
    /// Endpoints run concurrently and a failing endpoint never affects the
    /// others. A lost store session is returned after the pass so the
    /// caller can re-register.
    pub async fn tick(&self) -> ManagerResult<TickReport> {
        if !self.state.lock().await.serving {
            return Err(ManagerError::NotServing(self.uuid.clone()));
        }
        self.refresh_ring().await?;
        self.sync_endpoints().await?;
        self.process_inbox().await?;

        let (endpoints, owned) = self.snapshot().await;
        self.check_endpoint_ips(&endpoints, &owned).await?;

        let observed = self.observe().await;
        let aggregator = Aggregator::new(self.store.clone(), &self.uuid);
        let merged = Arc::new(aggregator.metrics(&observed.metrics)?);
        let pending = Arc::new(aggregator.pending(&observed.pending)?);

        let mut tasks = JoinSet::new();
        let mut task_names = HashMap::new();
        for (name, endpoint) in &endpoints {
            let task = tick_endpoint(
                self.uuid.clone(),
                endpoint.clone(),
                owned.contains(name),
                merged.clone(),
                pending.clone(),
            );
            let name = name.clone();
            let handle = tasks.spawn({
                let name = name.clone();
                async move { (name, task.await) }
            });
            task_names.insert(handle.id(), name);
        }

        let mut report = TickReport {
            endpoints: endpoints.len(),
            ..Default::default()
        };
        let mut active = 0.0;
        let mut transient = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(Some(outcome)))) => {
                    active += outcome.active;
                    report.outcomes.insert(name, outcome);
                }
                Ok((_, Ok(None))) => {}
                Ok((name, Err(e))) => {
                    warn!(manager = %self.uuid, endpoint = %name, error = %e, "endpoint tick failed");
                    self.log(ManagerEvent::EndpointFailed {
                        name: name.clone(),
                        error: e.to_string(),
                    });
                    if e.is_transient() {
                        transient = Some(e);
                    }
                    report.failed.push(name);
                }
                Err(e) => {
                    let name = task_names.get(&e.id()).cloned().unwrap_or_default();
                    error!(manager = %self.uuid, endpoint = %name, error = %e, "endpoint task panicked");
                    self.log(ManagerEvent::EndpointFailed {
                        name: name.clone(),
                        error: e.to_string(),
                    });
                    report.failed.push(name);
                }
            }
        }

        self.track_sessions(observed.sessions, &endpoints, &owned).await?;
        for (driver, lb) in self.host.all_loadbalancers() {
            if let Err(e) = lb.save().await {
                warn!(manager = %self.uuid, %driver, error = %e, "load balancer save failed");
            }
        }

        report.active = active.max(0.0).round() as u64;
        aggregator.active(report.active)?;
        for name in self.directory.clean()? {
            self.log(ManagerEvent::EndpointCleaned { name });
        }

        if let Some(e) = transient {
            return Err(e.into());
        }
        Ok(report)
    }
}

impl Drop for ScaleManager {
    fn drop(&mut self) {
        if let Some(watcher) = self.state.get_mut().watcher.take() {
            watcher.abort();
        }
    }
}

/// One endpoint's share of a tick.
async fn tick_endpoint(
    manager: String,
    endpoint: SharedEndpoint,
    owner: bool,
    merged: Arc<MergedMetrics>,
    pending: Arc<HashMap<String, u64>>,
) -> EndpointResult<Option<UpdateOutcome>> {
    let mut endpoint = endpoint.lock().await;
    let marker = endpoint.records().manager()?;
    if owner {
        if marker.as_deref() != Some(manager.as_str()) {
            endpoint.records().set_manager(&manager)?;
            info!(%manager, endpoint = %endpoint.name(), "endpoint claimed");
        }
        let outcome = endpoint.tick(&merged, &pending).await?;
        endpoint.stage_backends(false).await?;
        Ok(Some(outcome))
    } else {
        if marker.as_deref() == Some(manager.as_str()) {
            endpoint.records().clear_manager()?;
            info!(%manager, endpoint = %endpoint.name(), "endpoint handed off");
        }
        endpoint.stage_backends(false).await?;
        Ok(None)
    }
}

/// Deliver store watch events to the manager until it is dropped.
async fn dispatch(manager: Weak<ScaleManager>, mut events: mpsc::UnboundedReceiver<WatchEvent>) {
    while let Some(event) = events.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        if let Err(e) = manager.on_watch(&event).await {
            warn!(manager = %manager.uuid, path = %event.path, error = %e, "watch handler failed");
        }
    }
}
