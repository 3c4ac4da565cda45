//! Health check: reap vanished, unregistered, errored and drained
//! instances.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, warn};

use ringscale_core::Instance;
use ringscale_drivers::{CloudDriver, DriverError};

use crate::endpoint::Endpoint;
use crate::error::EndpointResult;
use crate::events::EndpointEvent;
use crate::scaling::Retired;

/// Instance launched but never confirmed by its own registration.
pub const UNREGISTERED_MARK: &str = "unregistered";

/// Decommissioned instance that has stopped carrying traffic.
pub const DECOMMISSIONED_MARK: &str = "decommissioned";

/// Instance the cloud or a load balancer reported as failing.
pub const ERROR_MARK: &str = "error";

/// Result of one health check, consumed by `update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthReport {
    /// Instances with at least one IP carrying live connections.
    pub active_ids: Vec<String>,
    pub inactive_ids: Vec<String>,
    /// Instances deleted from the cloud during this check.
    pub deleted: Vec<String>,
    /// Instances pulled from service for errors during this check.
    pub errored: Vec<String>,
    /// Whether the confirmed IP set changed.
    pub changed: bool,
}

/// Which bookkeeping map an instance lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pool {
    Serving,
    Decommissioned,
    Errored,
}

impl Endpoint {
    /// Reconcile bookkeeping against the cloud and reap dead instances.
    ///
    /// `active_ips` are the backend IPs the load balancers saw carrying
    /// connections. An endpoint without a cloud has nothing to check.
    pub async fn health_check(
        &mut self,
        active_ips: &BTreeSet<String>,
    ) -> EndpointResult<HealthReport> {
        let Some(cloud) = self.cloud()? else {
            return Ok(HealthReport::default());
        };
        let reported: BTreeMap<String, Instance> = cloud
            .list_instances(&self.name, &self.config)
            .await?
            .into_iter()
            .map(|instance| (instance.id.clone(), instance))
            .collect();

        let mut report = HealthReport::default();
        let mut instances = self.records.instances()?;
        let mut decommissioned = self.records.decommissioned()?;
        let mut errored = self.records.errored()?;

        self.reconcile(&mut instances, Pool::Serving, &reported).await?;
        self.reconcile(&mut decommissioned, Pool::Decommissioned, &reported)
            .await?;
        self.reconcile(&mut errored, Pool::Errored, &reported).await?;
        for id in self.records.marked_ids()? {
            if !reported.contains_key(&id) {
                self.records.clear_marks(&id)?;
            }
        }

        let failing: Vec<Instance> = instances
            .values()
            .filter(|instance| reported.get(&instance.id).is_some_and(Instance::is_errored))
            .cloned()
            .collect();
        for instance in failing {
            if !self.mark_instance(&instance.id, ERROR_MARK)? {
                continue;
            }
            warn!(endpoint = %self.name, id = %instance.id, "cloud reports instance in error");
            let parked = match self.retire(&cloud, &instance, Pool::Errored).await? {
                Retired::Parked => true,
                Retired::Deleted => false,
                Retired::Kept => continue,
            };
            instances.remove(&instance.id);
            report.changed = true;
            if parked {
                report.errored.push(instance.id.clone());
                errored.insert(instance.id.clone(), instance);
            } else {
                report.deleted.push(instance.id.clone());
            }
        }

        let confirmed = self.records.confirmed_ips()?;
        debug!(
            endpoint = %self.name,
            total = instances.len() + decommissioned.len() + errored.len(),
            confirmed = confirmed.len(),
            decommissioned = decommissioned.len(),
            errored = errored.len(),
            "instance states"
        );

        let mut associated = BTreeSet::new();
        for instance in instances.values() {
            let matched: Vec<&String> = instance
                .ips
                .iter()
                .filter(|ip| confirmed.contains(*ip))
                .collect();
            if !matched.is_empty() {
                associated.extend(matched.into_iter().cloned());
                self.clear_mark(&instance.id, UNREGISTERED_MARK)?;
                continue;
            }
            if self.mark_instance(&instance.id, UNREGISTERED_MARK)?
                && self
                    .delete_instance(&cloud, instance, Pool::Serving, "never registered")
                    .await?
            {
                report.deleted.push(instance.id.clone());
                report.changed = true;
            }
        }

        for ip in confirmed.difference(&associated) {
            self.records.unconfirm_ip(ip)?;
            self.record(EndpointEvent::DropIp {
                ip: ip.clone(),
                reason: "orphaned",
            })?;
            report.changed = true;
        }

        for instance in instances
            .values()
            .chain(decommissioned.values())
            .chain(errored.values())
        {
            if report.deleted.contains(&instance.id) {
                continue;
            }
            if instance.ips.iter().any(|ip| active_ips.contains(ip)) {
                report.active_ids.push(instance.id.clone());
            } else {
                report.inactive_ids.push(instance.id.clone());
            }
        }

        for id in &report.inactive_ids.clone() {
            let (instance, pool, reason) = match (decommissioned.get(id), errored.get(id)) {
                (Some(instance), _) => (instance, Pool::Decommissioned, "drained"),
                (None, Some(instance)) => (instance, Pool::Errored, "errored"),
                (None, None) => continue,
            };
            if self.mark_instance(id, DECOMMISSIONED_MARK)?
                && self.delete_instance(&cloud, instance, pool, reason).await?
            {
                report.deleted.push(id.clone());
                report.inactive_ids.retain(|i| i != id);
            }
        }

        Ok(report)
    }

    /// Drop entries the cloud stopped reporting and refresh the addresses
    /// of the rest.
    async fn reconcile(
        &self,
        known: &mut BTreeMap<String, Instance>,
        pool: Pool,
        reported: &BTreeMap<String, Instance>,
    ) -> EndpointResult<()> {
        let vanished: Vec<Instance> = known
            .values()
            .filter(|instance| !reported.contains_key(&instance.id))
            .cloned()
            .collect();
        for instance in vanished {
            self.clean_instance(&instance, pool).await?;
            self.record(EndpointEvent::ForgetInstance {
                id: instance.id.clone(),
            })?;
            known.remove(&instance.id);
        }

        for instance in known.values_mut() {
            let Some(current) = reported.get(&instance.id) else {
                continue;
            };
            if current.ips.is_empty() || current.ips == instance.ips {
                continue;
            }
            instance.ips = current.ips.clone();
            self.store_in(instance, pool)?;
        }
        Ok(())
    }

    pub(crate) fn store_in(&self, instance: &Instance, pool: Pool) -> EndpointResult<()> {
        match pool {
            Pool::Serving => self.records.put_instance(instance)?,
            Pool::Decommissioned => self.records.put_decommissioned(instance)?,
            Pool::Errored => self.records.put_errored(instance)?,
        }
        Ok(())
    }

    /// A load balancer saw `ip` fail. Marks the serving instance behind
    /// it, and pulls that instance from service once the marks add up.
    /// Returns false when no serving instance of this endpoint owns `ip`.
    pub async fn ip_errored(&self, ip: &str) -> EndpointResult<bool> {
        let instances = self.records.instances()?;
        let Some(instance) = instances
            .values()
            .find(|instance| instance.ips.iter().any(|i| i == ip))
        else {
            return Ok(false);
        };
        if self.mark_instance(&instance.id, ERROR_MARK)? {
            warn!(endpoint = %self.name, id = %instance.id, %ip, "backend reported in error");
            match self.cloud()? {
                Some(cloud) => {
                    self.retire(&cloud, instance, Pool::Errored).await?;
                }
                None => debug!(endpoint = %self.name, id = %instance.id, "no cloud to retire through"),
            }
        }
        Ok(true)
    }

    /// Bump the `label` counter for an instance. Returns true, and resets
    /// every counter, once the configured threshold is reached.
    pub fn mark_instance(&self, id: &str, label: &'static str) -> EndpointResult<bool> {
        let mut marks = self.records.marks(id)?;
        let count = marks.get(label).copied().unwrap_or(0) + 1;
        if count >= self.config.marks {
            self.records.clear_marks(id)?;
            return Ok(true);
        }
        marks.insert(label.to_string(), count);
        self.records.set_marks(id, &marks)?;
        self.record(EndpointEvent::MarkInstance {
            id: id.to_string(),
            label,
            count,
        })?;
        Ok(false)
    }

    fn clear_mark(&self, id: &str, label: &str) -> EndpointResult<()> {
        let mut marks = self.records.marks(id)?;
        if marks.remove(label).is_some() {
            self.records.set_marks(id, &marks)?;
        }
        Ok(())
    }

    /// Delete an instance from the cloud, then forget it. A failed cloud
    /// call leaves every record in place for the next tick.
    pub(crate) async fn delete_instance(
        &self,
        cloud: &Arc<dyn CloudDriver>,
        instance: &Instance,
        pool: Pool,
        reason: &'static str,
    ) -> EndpointResult<bool> {
        match cloud
            .delete_instance(&self.name, &self.config, &instance.id)
            .await
        {
            Ok(()) => {}
            Err(DriverError::InstanceNotFound(_)) => {
                debug!(endpoint = %self.name, id = %instance.id, "instance already gone");
            }
            Err(DriverError::Store(e)) if e.is_transient() => return Err(DriverError::Store(e).into()),
            Err(e) => {
                warn!(endpoint = %self.name, id = %instance.id, error = %e, "instance delete failed");
                self.record(EndpointEvent::DeleteFailed {
                    id: instance.id.clone(),
                    error: e.to_string(),
                })?;
                return Ok(false);
            }
        }
        self.clean_instance(instance, pool).await?;
        self.record(EndpointEvent::DeleteInstance {
            id: instance.id.clone(),
            reason,
        })?;
        Ok(true)
    }

    /// Remove every local trace of an instance.
    pub(crate) async fn clean_instance(&self, instance: &Instance, pool: Pool) -> EndpointResult<()> {
        if let Some(lb) = self.loadbalancer()? {
            if let Err(e) = lb.cleanup(&self.config, &instance.name).await {
                self.warn_driver(lb.name(), e)?;
            }
        }
        for ip in &instance.ips {
            if self.records.unconfirm_ip(ip)? {
                self.record(EndpointEvent::DropIp {
                    ip: ip.clone(),
                    reason: "clean",
                })?;
            }
            self.records.remove_ip_metrics(ip)?;
        }
        match pool {
            Pool::Serving => self.records.remove_instance(&instance.id)?,
            Pool::Decommissioned => self.records.remove_decommissioned(&instance.id)?,
            Pool::Errored => self.records.remove_errored(&instance.id)?,
        };
        self.records.clear_marks(&instance.id)?;
        Ok(())
    }
}
