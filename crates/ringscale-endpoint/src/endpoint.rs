//! The endpoint handle: configuration, state, metrics intake, backends.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use ringscale_core::{
    ACTIVE_METRIC, Backend, EndpointConfig, EndpointState, MergedMetrics,
    PENDING_METRIC, Sample, ip_of,
};
use ringscale_drivers::{CloudDriver, LoadBalancerDriver};
use ringscale_metrics::validate_config;
use ringscale_store::{CoordinationStore, EndpointRecords, EventLog};

use crate::error::{EndpointError, EndpointResult};
use crate::events::EndpointEvent;
use crate::host::EndpointHost;
use crate::scaling::UpdateOutcome;

/// Explicit port of a backend address, if it carries one.
fn port_of(address: &str) -> Option<u16> {
    let port = match address.strip_prefix('[') {
        Some(rest) => rest.split_once("]:")?.1,
        None if address.matches(':').count() == 1 => address.split_once(':')?.1,
        None => return None,
    };
    port.parse().ok()
}

/// Metrics relevant to one endpoint, cut out of the fleet-wide merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedMetrics {
    /// Every sample that feeds the scaling rules.
    pub samples: Vec<Sample>,
    /// Backend IPs that reported at least one sample.
    pub metric_ips: BTreeSet<String>,
    /// Backend IPs with live connections.
    pub active_ips: BTreeSet<String>,
    /// Sum of the `active` metric across the endpoint's backends.
    pub active_total: f64,
}

pub struct Endpoint {
    pub(crate) name: String,
    pub(crate) records: EndpointRecords,
    pub(crate) config: EndpointConfig,
    pub(crate) state: EndpointState,
    pub(crate) log: EventLog,
    pub(crate) host: Option<Arc<dyn EndpointHost>>,
    /// Whether the last running update saw conflicting rules.
    pub(crate) conflicted: bool,
}

impl Endpoint {
    /// Load an endpoint from the store. A missing config yields defaults;
    /// a stored config that fails validation is an error.
    pub fn open(
        store: Arc<dyn CoordinationStore>,
        name: &str,
        host: Option<Arc<dyn EndpointHost>>,
    ) -> EndpointResult<Self> {
        let records = EndpointRecords::new(store, name);
        let config = records.config()?.unwrap_or_default();
        validate_config(&config)?;
        let state = records.state()?.unwrap_or(config.initial_state);
        let log = records.log();
        Ok(Self {
            name: name.to_string(),
            records,
            config,
            state,
            log,
            host,
            conflicted: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn records(&self) -> &EndpointRecords {
        &self.records
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Ring key, derived from the current configuration.
    pub fn key(&self) -> String {
        self.config.key()
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    pub(crate) fn record(&self, event: EndpointEvent) -> EndpointResult<()> {
        self.log.append(event.severity(), event.to_string())?;
        Ok(())
    }

    // ── Config and state ───────────────────────────────────────────

    /// Pick up a changed configuration from the store.
    ///
    /// Returns true when the change affects which managers may own the
    /// endpoint. A URL change first withdraws this endpoint's backends
    /// from the old URL. An invalid config is logged and ignored; the
    /// endpoint keeps running on the one it has.
    pub async fn reload_config(&mut self) -> EndpointResult<bool> {
        let Some(config) = self.records.config()? else {
            return Ok(false);
        };
        if config == self.config {
            return Ok(false);
        }
        if let Err(e) = validate_config(&config) {
            warn!(endpoint = %self.name, error = %e, "rejecting endpoint config");
            self.record(EndpointEvent::ConfigRejected {
                reason: e.to_string(),
            })?;
            return Ok(false);
        }
        let placement = self.config.placement_changed(&config);
        if self.config.url != config.url && self.host.is_some() {
            if let Some(lb) = self.stage_backends(true).await? {
                lb.save().await?;
            }
        }
        self.config = config;
        self.record(EndpointEvent::ConfigReloaded)?;
        if self.host.is_some() {
            self.refresh_backends().await?;
        }
        Ok(placement)
    }

    /// Pick up a changed state from the store.
    pub fn reload_state(&mut self) -> EndpointResult<EndpointState> {
        let state = self
            .records
            .state()?
            .unwrap_or(self.config.initial_state);
        self.set_state(state)?;
        Ok(state)
    }

    /// Apply an action token (`start`, `stop`, `pause`) and persist it.
    pub fn action(&mut self, token: &str) -> EndpointResult<EndpointState> {
        let state = self.records.action(token, self.state)?;
        self.set_state(state)?;
        Ok(state)
    }

    fn set_state(&mut self, state: EndpointState) -> EndpointResult<()> {
        if state != self.state {
            self.state = state;
            self.record(EndpointEvent::StateChanged {
                state: state.to_string(),
            })?;
        }
        Ok(())
    }

    /// Release the manager's callback interface. Every later call that
    /// needs a driver fails with [`EndpointError::Detached`].
    pub fn detach(&mut self) {
        if let Some(host) = self.host.take() {
            host.backends().remove(&self.name);
        }
    }

    pub(crate) fn host(&self) -> EndpointResult<&Arc<dyn EndpointHost>> {
        self.host
            .as_ref()
            .ok_or_else(|| EndpointError::Detached(self.name.clone()))
    }

    /// The configured cloud driver. `None` when the endpoint has no cloud;
    /// an error when it names one the host does not run.
    pub(crate) fn cloud(&self) -> EndpointResult<Option<Arc<dyn CloudDriver>>> {
        let Some(name) = self.config.cloud.as_deref() else {
            return Ok(None);
        };
        match self.host()?.cloud(name) {
            Some(cloud) => Ok(Some(cloud)),
            None => Err(EndpointError::DriverUnavailable(name.to_string())),
        }
    }

    /// The configured load balancer, if this host runs it.
    pub(crate) fn loadbalancer(&self) -> EndpointResult<Option<Arc<dyn LoadBalancerDriver>>> {
        let Some(name) = self.config.loadbalancer.as_deref() else {
            return Ok(None);
        };
        let lb = self.host()?.loadbalancer(name);
        if lb.is_none() {
            debug!(endpoint = %self.name, driver = %name, "load balancer not available here");
        }
        Ok(lb)
    }

    // ── Metrics ────────────────────────────────────────────────────

    /// Every IP that belongs to the endpoint in any role.
    fn endpoint_ips(records: &EndpointRecords, config: &EndpointConfig) -> EndpointResult<BTreeSet<String>> {
        let mut ips = records.confirmed_ips()?;
        ips.extend(config.static_ips());
        for instance in records.instances()?.values() {
            ips.extend(instance.ips.iter().cloned());
        }
        let (decommissioned, errored) = (records.decommissioned()?, records.errored()?);
        for instance in decommissioned.values().chain(errored.values()) {
            ips.extend(instance.ips.iter().cloned());
        }
        Ok(ips)
    }

    /// Collect the samples this endpoint scales on.
    ///
    /// `merged` is the fleet-wide `ip -> samples` merge and `pending` the
    /// fleet-wide queued-connection count per URL. With `metrics_source`
    /// set, backend samples come from that endpoint's IPs instead.
    pub fn load_metrics(
        &self,
        merged: &MergedMetrics,
        pending: &HashMap<String, u64>,
    ) -> EndpointResult<LoadedMetrics> {
        let ips = match self.config.metrics_source.as_deref() {
            Some(source) => {
                let records = EndpointRecords::new(self.records.store().clone(), source);
                let config = records.config()?.unwrap_or_default();
                Self::endpoint_ips(&records, &config)?
            }
            None => Self::endpoint_ips(&self.records, &self.config)?,
        };

        let mut loaded = LoadedMetrics::default();
        for (address, samples) in merged {
            let ip = ip_of(address);
            if !ips.contains(ip) {
                continue;
            }
            for sample in samples {
                if let Some(&(_, active)) = sample.get(ACTIVE_METRIC) {
                    if active.is_finite() && active > 0.0 {
                        loaded.active_ips.insert(ip.to_string());
                        loaded.active_total += active;
                    }
                }
                loaded.samples.push(sample.clone());
            }
            if !samples.is_empty() {
                loaded.metric_ips.insert(ip.to_string());
            }
        }

        for (ip, sample) in self.records.ip_metrics()? {
            if ips.contains(&ip) {
                loaded.samples.push(sample);
                loaded.metric_ips.insert(ip);
            }
        }
        if let Some(custom) = self.records.custom_metrics()? {
            loaded.samples.push(custom);
        }

        if let Some(url) = self.config.url.as_deref() {
            let queued = pending.get(url).copied().unwrap_or(0);
            if queued > 0 {
                let per_instance = queued as f64 / loaded.metric_ips.len().max(1) as f64;
                let mut sample = Sample::new();
                sample.insert(PENDING_METRIC.to_string(), (1.0, per_instance));
                loaded.samples.push(sample);
            }
        }
        Ok(loaded)
    }

    // ── Registration ───────────────────────────────────────────────

    /// An instance reported in from `ip`. Confirms it when one of this
    /// endpoint's instances expects that address.
    pub fn ip_confirmed(&self, ip: &str) -> EndpointResult<bool> {
        let instances = self.records.instances()?;
        let owned = instances
            .values()
            .any(|instance| instance.ips.iter().any(|i| i == ip));
        if owned {
            self.records.confirm_ip(ip)?;
            self.record(EndpointEvent::ConfirmIp {
                ip: ip.to_string(),
                reason: "confirmed",
            })?;
        }
        Ok(owned)
    }

    /// An instance signed off from `ip`. The instance itself is reaped by
    /// the health check once its marks run out.
    pub fn ip_dropped(&self, ip: &str) -> EndpointResult<bool> {
        let dropped = self.records.unconfirm_ip(ip)?;
        if dropped {
            self.record(EndpointEvent::DropIp {
                ip: ip.to_string(),
                reason: "dropped",
            })?;
        }
        Ok(dropped)
    }

    // ── Sessions ───────────────────────────────────────────────────

    pub fn session_opened(&self, client: &str, backend: &str) -> EndpointResult<()> {
        self.records.open_session(client, backend)?;
        self.record(EndpointEvent::SessionOpened {
            client: client.to_string(),
            backend: backend.to_string(),
        })
    }

    pub fn session_closed(&self, client: &str) -> EndpointResult<()> {
        if self.records.close_session(client)? {
            self.record(EndpointEvent::SessionClosed {
                client: client.to_string(),
            })?;
        }
        Ok(())
    }

    // ── Backends ───────────────────────────────────────────────────

    fn backends_of(records: &EndpointRecords, config: &EndpointConfig) -> EndpointResult<Vec<Backend>> {
        let mut backends: Vec<Backend> = config
            .static_instances
            .iter()
            .map(|entry| {
                let entry = entry.trim();
                Backend::new(ip_of(entry), port_of(entry).or(config.port), config.weight)
            })
            .collect();
        backends.extend(
            records
                .confirmed_ips()?
                .into_iter()
                .map(|ip| Backend::new(ip, config.port, config.weight)),
        );
        backends.sort();
        backends.dedup();
        Ok(backends)
    }

    /// Backends this endpoint contributes to its URL: static entries plus
    /// confirmed IPs, or another endpoint's with `instances_source`.
    pub fn backends(&self) -> EndpointResult<Vec<Backend>> {
        match self.config.instances_source.as_deref() {
            Some(source) => {
                let records = EndpointRecords::new(self.records.store().clone(), source);
                let config = records.config()?.unwrap_or_default();
                Self::backends_of(&records, &config)
            }
            None => Self::backends_of(&self.records, &self.config),
        }
    }

    /// Publish this endpoint's backends to the host table (or withdraw
    /// them when `exclude` is set) and hand every backend sharing its URL
    /// to the load balancer. The caller saves the returned driver.
    pub async fn stage_backends(
        &self,
        exclude: bool,
    ) -> EndpointResult<Option<Arc<dyn LoadBalancerDriver>>> {
        let host = self.host()?;
        let key = self.key();
        if exclude {
            host.backends().remove(&self.name);
        } else {
            host.backends().publish(&self.name, &key, self.backends()?);
        }
        let Some(url) = self.config.url.as_deref().filter(|u| !u.is_empty()) else {
            return Ok(None);
        };
        let Some(lb) = self.loadbalancer()? else {
            return Ok(None);
        };
        let backends = host.backends().collect(&key);
        lb.change(url, &backends, &self.config).await?;
        Ok(Some(lb))
    }

    /// Stage and save immediately.
    pub async fn refresh_backends(&self) -> EndpointResult<()> {
        if let Some(lb) = self.stage_backends(false).await? {
            lb.save().await?;
            let backends = self.host()?.backends().collect(&self.key()).len();
            self.record(EndpointEvent::Reload { backends })?;
        }
        Ok(())
    }

    // ── Control loop ───────────────────────────────────────────────

    /// One owned tick: health check, then update, then a backend refresh
    /// if either changed the confirmed set.
    pub async fn tick(
        &mut self,
        merged: &MergedMetrics,
        pending: &HashMap<String, u64>,
    ) -> EndpointResult<UpdateOutcome> {
        let loaded = self.load_metrics(merged, pending)?;
        let report = self.health_check(&loaded.active_ips).await?;
        let outcome = self.update(&loaded, &report).await?;
        if report.changed || outcome.changed() {
            self.refresh_backends().await?;
        }
        Ok(outcome)
    }

    /// Publish the debugging views of the last update.
    pub(crate) fn publish_live(
        &self,
        totals: &BTreeMap<String, f64>,
        active: &BTreeSet<String>,
    ) -> EndpointResult<()> {
        self.records.publish_live_metrics(totals)?;
        let active: Vec<String> = active.iter().cloned().collect();
        self.records.publish_live_active(&active)?;
        Ok(())
    }

    pub(crate) fn warn_driver(&self, driver: &str, error: impl std::fmt::Display) -> EndpointResult<()> {
        warn!(endpoint = %self.name, %driver, error = %error, "driver call failed");
        self.record(EndpointEvent::DriverFailed {
            driver: driver.to_string(),
            error: error.to_string(),
        })
    }
}
