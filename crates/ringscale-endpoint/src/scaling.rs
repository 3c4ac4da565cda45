//! Scaling decisions: target range, ramp-limited launch and decommission.

use std::sync::Arc;

use tracing::{debug, warn};

use ringscale_core::{EndpointState, Instance, Sample, StartParams};
use ringscale_drivers::{CloudDriver, DriverError};
use ringscale_metrics::{IdealRange, calculate_ideal_uniform, calculate_totals};

use crate::endpoint::{Endpoint, LoadedMetrics};
use crate::error::EndpointResult;
use crate::events::EndpointEvent;
use crate::health::{HealthReport, Pool};

/// What one `update` decided and did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Serving instances before the update.
    pub current: u64,
    pub target: u64,
    /// The target range, when the endpoint is running.
    pub range: Option<IdealRange>,
    pub recommissioned: Vec<String>,
    pub launched: Vec<String>,
    pub failed_launches: usize,
    pub decommissioned: Vec<String>,
    /// Never-confirmed instances deleted instead of decommissioned.
    pub deleted: Vec<String>,
    /// Sum of the `active` metric across the endpoint's backends.
    pub active: f64,
}

impl UpdateOutcome {
    fn hold(current: u64) -> Self {
        Self {
            current,
            target: current,
            ..Default::default()
        }
    }

    /// Operations charged against the ramp limit.
    pub fn actions(&self) -> usize {
        self.recommissioned.len()
            + self.launched.len()
            + self.failed_launches
            + self.decommissioned.len()
            + self.deleted.len()
    }

    /// Whether the confirmed IP set may have changed.
    pub fn changed(&self) -> bool {
        !(self.recommissioned.is_empty()
            && self.launched.is_empty()
            && self.decommissioned.is_empty()
            && self.deleted.is_empty())
    }
}

/// Intersect an ideal range with the configured bounds.
///
/// When the two do not overlap, both ends collapse onto the configured
/// bound nearest the demand. The result is never inverted as long as
/// `ideal_min <= ideal_max`.
pub fn clamp_target(ideal_min: u64, ideal_max: u64, config_min: u64, config_max: u64) -> (u64, u64) {
    let min = ideal_min.max(config_min);
    let max = ideal_max.min(config_max);
    if max >= min {
        (min, max)
    } else if ideal_min > config_max {
        (config_max, config_max)
    } else {
        (config_min, config_min)
    }
}

/// Running target: hold when inside the range or without a usable signal,
/// otherwise aim for the midpoint.
fn running_target(current: u64, range: &IdealRange) -> u64 {
    match *range {
        IdealRange::Range { min, max } if current < min || current > max => {
            min + (max - min) / 2
        }
        _ => current,
    }
}

/// How an instance left the serving set.
pub(crate) enum Retired {
    Parked,
    Deleted,
    Kept,
}

impl Endpoint {
    /// Target instance range for the given samples.
    ///
    /// `metric_instances` is the number of backends that contributed the
    /// samples. Sentinels pass through unclamped; callers hold on them.
    pub fn determine_target_range(&self, samples: &[Sample], metric_instances: usize) -> IdealRange {
        let ideal = calculate_ideal_uniform(&self.config.scaling.rules, samples, metric_instances);
        match ideal {
            IdealRange::Unconstrained => ideal,
            IdealRange::Conflict { min, max } => {
                if !samples.is_empty() {
                    warn!(endpoint = %self.name, min, max, "scaling rules conflict");
                }
                ideal
            }
            IdealRange::Range { min, max } => {
                let (min, max) = clamp_target(
                    min,
                    max,
                    u64::from(self.config.scaling.min_instances),
                    u64::from(self.config.scaling.max_instances),
                );
                IdealRange::Range { min, max }
            }
        }
    }

    /// Move the instance count toward its target, at most `ramp_limit`
    /// operations per call (unbounded while stopped).
    pub async fn update(
        &mut self,
        loaded: &LoadedMetrics,
        report: &HealthReport,
    ) -> EndpointResult<UpdateOutcome> {
        let totals = calculate_totals(&loaded.samples);
        self.publish_live(&totals, &loaded.active_ips)?;

        let instances = self.records.instances()?;
        let current = instances.len() as u64;
        let mut outcome = UpdateOutcome::hold(current);
        outcome.active = loaded.active_total;

        let (target, ramp) = match self.state {
            EndpointState::Paused => return Ok(outcome),
            EndpointState::Stopped => (0, u64::MAX),
            EndpointState::Running => {
                let range = self.determine_target_range(&loaded.samples, loaded.metric_ips.len());
                self.note_conflict(&range, !loaded.samples.is_empty())?;
                outcome.range = Some(range);
                (
                    running_target(current, &range),
                    u64::from(self.config.scaling.ramp_limit),
                )
            }
        };
        if target == current {
            return Ok(outcome);
        }
        let Some(cloud) = self.cloud()? else {
            debug!(endpoint = %self.name, current, target, "no cloud configured, holding");
            return Ok(outcome);
        };
        outcome.target = target;
        self.record(EndpointEvent::Scaling { current, target })?;

        let mut budget = ramp;
        if target > current {
            let mut count = current;
            let mut parked: Vec<Instance> = self.records.decommissioned()?.into_values().collect();
            while count < target && budget > 0 {
                let Some(instance) = parked.pop() else {
                    break;
                };
                self.recommission(&instance)?;
                outcome.recommissioned.push(instance.id);
                count += 1;
                budget -= 1;
            }
            while count < target && budget > 0 {
                budget -= 1;
                match self.launch_instance(&cloud).await? {
                    Some(instance) => {
                        outcome.launched.push(instance.id);
                        count += 1;
                    }
                    None => outcome.failed_launches += 1,
                }
            }
        } else {
            let mut candidates: Vec<&Instance> = Vec::with_capacity(instances.len());
            let preferred = report.inactive_ids.iter().chain(&report.active_ids);
            for instance in preferred
                .filter_map(|id| instances.get(id))
                .chain(instances.values())
            {
                if !candidates.iter().any(|c| c.id == instance.id) {
                    candidates.push(instance);
                }
            }
            let to_do = (current - target).min(budget).min(candidates.len() as u64) as usize;
            for instance in candidates.into_iter().take(to_do) {
                match self.retire(&cloud, instance, Pool::Decommissioned).await? {
                    Retired::Parked => outcome.decommissioned.push(instance.id.clone()),
                    Retired::Deleted => outcome.deleted.push(instance.id.clone()),
                    Retired::Kept => {}
                }
            }
        }
        Ok(outcome)
    }

    /// Record a rule conflict once when it starts.
    fn note_conflict(&mut self, range: &IdealRange, had_samples: bool) -> EndpointResult<()> {
        let conflict = matches!(range, IdealRange::Conflict { .. });
        if let IdealRange::Conflict { min, max } = *range {
            if had_samples && !self.conflicted {
                self.record(EndpointEvent::RuleConflict { min, max })?;
            }
        }
        self.conflicted = conflict;
        Ok(())
    }

    fn recommission(&self, instance: &Instance) -> EndpointResult<()> {
        self.records.remove_decommissioned(&instance.id)?;
        self.records.clear_marks(&instance.id)?;
        self.records.put_instance(instance)?;
        for ip in &instance.ips {
            self.records.confirm_ip(ip)?;
            self.record(EndpointEvent::ConfirmIp {
                ip: ip.clone(),
                reason: "recommission",
            })?;
        }
        self.record(EndpointEvent::RecommissionInstance {
            id: instance.id.clone(),
            ips: instance.ips.clone(),
        })
    }

    /// Launch one instance. Addresses the cloud returns are confirmed
    /// immediately. `None` when the cloud refused.
    async fn launch_instance(&self, cloud: &Arc<dyn CloudDriver>) -> EndpointResult<Option<Instance>> {
        let lb = self.loadbalancer()?;
        let params = match &lb {
            Some(lb) => match lb.start_params(&self.config).await {
                Ok(params) => params,
                Err(e) => {
                    self.warn_driver(lb.name(), e)?;
                    StartParams::new()
                }
            },
            None => StartParams::new(),
        };

        match cloud.start_instance(&self.name, &self.config, &params).await {
            Ok(instance) => {
                self.records.put_instance(&instance)?;
                for ip in &instance.ips {
                    self.records.confirm_ip(ip)?;
                    self.record(EndpointEvent::ConfirmIp {
                        ip: ip.clone(),
                        reason: "launch",
                    })?;
                }
                self.record(EndpointEvent::LaunchInstance {
                    id: instance.id.clone(),
                    ips: instance.ips.clone(),
                })?;
                Ok(Some(instance))
            }
            Err(DriverError::Store(e)) if e.is_transient() => Err(DriverError::Store(e).into()),
            Err(e) => {
                warn!(endpoint = %self.name, error = %e, "instance launch failed");
                self.record(EndpointEvent::LaunchFailed {
                    error: e.to_string(),
                })?;
                if let Some(lb) = &lb {
                    if let Err(e) = lb.cleanup_start_params(&self.config, &params).await {
                        self.warn_driver(lb.name(), e)?;
                    }
                }
                Ok(None)
            }
        }
    }

    /// Take an instance out of service into `pool`, where it drains. One
    /// that never confirmed an address has served nothing to drain and is
    /// deleted outright.
    pub(crate) async fn retire(
        &self,
        cloud: &Arc<dyn CloudDriver>,
        instance: &Instance,
        pool: Pool,
    ) -> EndpointResult<Retired> {
        let confirmed = self.records.confirmed_ips()?;
        if !instance.ips.iter().any(|ip| confirmed.contains(ip)) {
            let deleted = self
                .delete_instance(cloud, instance, Pool::Serving, "never served")
                .await?;
            return Ok(if deleted { Retired::Deleted } else { Retired::Kept });
        }

        self.records.remove_instance(&instance.id)?;
        self.store_in(instance, pool)?;
        let reason = if pool == Pool::Errored { "error" } else { "decommission" };
        for ip in &instance.ips {
            if self.records.unconfirm_ip(ip)? {
                self.record(EndpointEvent::DropIp {
                    ip: ip.clone(),
                    reason,
                })?;
            }
        }
        let (id, ips) = (instance.id.clone(), instance.ips.clone());
        self.record(match pool {
            Pool::Errored => EndpointEvent::ErrorInstance { id, ips },
            _ => EndpointEvent::DecommissionInstance { id, ips },
        })?;
        Ok(Retired::Parked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    use proptest::prelude::*;

    use ringscale_core::EndpointConfig;

    use crate::testing::{TestHost, memory_config, open_endpoint};

    fn rate_sample(value: f64) -> Sample {
        BTreeMap::from([("rate".to_string(), (1.0, value))])
    }

    fn loaded(samples: Vec<Sample>, ips: &[&str]) -> LoadedMetrics {
        LoadedMetrics {
            samples,
            metric_ips: ips.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn scenario_config(min: u32, max: u32, ramp: u32) -> EndpointConfig {
        let mut config = memory_config();
        config.scaling.rules = vec!["20<=rate<=50".to_string()];
        config.scaling.min_instances = min;
        config.scaling.max_instances = max;
        config.scaling.ramp_limit = ramp;
        config
    }

    /// Serving instances that are registered with the cloud and confirmed.
    fn seed_serving(host: &TestHost, endpoint: &Endpoint, ids: &[&str]) {
        for (n, id) in ids.iter().enumerate() {
            let ip = format!("10.8.0.{}", n + 1);
            let instance = Instance::new(*id, format!("web-{id}"), vec![ip.clone()]);
            host.cloud.insert(endpoint.name(), instance.clone());
            endpoint.records().put_instance(&instance).unwrap();
            endpoint.records().confirm_ip(&ip).unwrap();
        }
    }

    #[test]
    fn test_clamp_target() {
        assert_eq!(clamp_target(6, 15, 1, 20), (6, 15));
        assert_eq!(clamp_target(2, 4, 3, 10), (3, 4));
        // Demand above the configured ceiling.
        assert_eq!(clamp_target(30, 40, 1, 20), (20, 20));
        // Demand below the configured floor.
        assert_eq!(clamp_target(0, 1, 3, 10), (3, 3));
    }

    #[test]
    fn test_running_target() {
        assert_eq!(running_target(0, &IdealRange::Range { min: 6, max: 15 }), 10);
        assert_eq!(running_target(8, &IdealRange::Range { min: 6, max: 15 }), 8);
        assert_eq!(running_target(3, &IdealRange::Unconstrained), 3);
        assert_eq!(running_target(3, &IdealRange::Conflict { min: 4, max: 2 }), 3);
    }

    #[tokio::test]
    async fn test_scenario_a_target_range() {
        let host = TestHost::new();
        let endpoint = open_endpoint(&host, "web", &scenario_config(1, 20, 5));
        let range = endpoint.determine_target_range(&[rate_sample(300.0)], 1);
        assert_eq!(range, IdealRange::Range { min: 6, max: 15 });
    }

    #[tokio::test]
    async fn test_scenario_a_scales_to_midpoint() {
        let host = TestHost::new();
        let mut endpoint = open_endpoint(&host, "web", &scenario_config(1, 20, 20));
        endpoint.action("start").unwrap();

        let outcome = endpoint
            .update(&loaded(vec![rate_sample(300.0)], &["10.7.0.1"]), &HealthReport::default())
            .await
            .unwrap();
        assert_eq!(outcome.current, 0);
        assert_eq!(outcome.target, 10);
        assert_eq!(outcome.launched.len(), 10);
        assert_eq!(host.cloud.instances("web").len(), 10);
        // Launch addresses are pre-confirmed.
        assert_eq!(endpoint.records().confirmed_ips().unwrap().len(), 10);
        assert!(endpoint.records().live_metrics().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalid_rule_reload_keeps_scaling() {
        let host = TestHost::new();
        let config = scenario_config(1, 20, 20);
        let mut endpoint = open_endpoint(&host, "web", &config);
        endpoint.action("start").unwrap();

        let mut bad = config.clone();
        bad.scaling.rules = vec!["rate<=0".to_string()];
        endpoint.records().set_config(&bad).unwrap();
        assert!(!endpoint.reload_config().await.unwrap());
        assert_eq!(endpoint.config(), &config);
        let entries = endpoint.log().entries().unwrap();
        assert!(entries.iter().any(|e| e.message.contains("configuration rejected")));

        // Scales on the previous rule, not down to the configured minimum.
        let outcome = endpoint
            .update(&loaded(vec![rate_sample(300.0)], &["10.7.0.1"]), &HealthReport::default())
            .await
            .unwrap();
        assert_eq!(outcome.target, 10);
        assert_eq!(host.cloud.instances("web").len(), 10);
    }

    #[tokio::test]
    async fn test_scenario_b_no_rules_holds() {
        let host = TestHost::new();
        let mut config = memory_config();
        config.scaling.min_instances = 3;
        config.scaling.max_instances = 5;
        let mut endpoint = open_endpoint(&host, "web", &config);
        endpoint.action("start").unwrap();

        let outcome = endpoint
            .update(&LoadedMetrics::default(), &HealthReport::default())
            .await
            .unwrap();
        assert_eq!(outcome.range, Some(IdealRange::Unconstrained));
        assert_eq!(outcome.target, 0);
        assert_eq!(outcome.actions(), 0);
        assert!(host.cloud.instances("web").is_empty());
    }

    #[tokio::test]
    async fn test_ramp_limit_caps_launches() {
        let host = TestHost::new();
        let mut endpoint = open_endpoint(&host, "web", &scenario_config(1, 20, 3));
        endpoint.action("start").unwrap();

        let outcome = endpoint
            .update(&loaded(vec![rate_sample(300.0)], &["10.7.0.1"]), &HealthReport::default())
            .await
            .unwrap();
        assert_eq!(outcome.target, 10);
        assert_eq!(outcome.launched.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_launches_consume_budget() {
        let host = TestHost::new();
        let mut endpoint = open_endpoint(&host, "web", &scenario_config(1, 20, 4));
        endpoint.action("start").unwrap();
        host.cloud.set_fail_starts(true);

        let outcome = endpoint
            .update(&loaded(vec![rate_sample(300.0)], &["10.7.0.1"]), &HealthReport::default())
            .await
            .unwrap();
        assert_eq!(outcome.failed_launches, 4);
        assert!(outcome.launched.is_empty());
        assert!(!outcome.changed());
        assert!(endpoint.records().instances().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recommission_before_launch() {
        let host = TestHost::new();
        let mut config = memory_config();
        config.scaling.rules = vec!["2<=instances<=2".to_string()];
        config.scaling.max_instances = 5;
        let mut endpoint = open_endpoint(&host, "web", &config);
        endpoint.action("start").unwrap();

        let parked = Instance::new("old-1", "web-old-1", vec!["10.6.0.1".to_string()]);
        host.cloud.insert("web", parked.clone());
        endpoint.records().put_decommissioned(&parked).unwrap();
        endpoint
            .records()
            .set_marks("old-1", &BTreeMap::from([("decommissioned".to_string(), 1)]))
            .unwrap();

        let outcome = endpoint
            .update(&LoadedMetrics::default(), &HealthReport::default())
            .await
            .unwrap();
        assert_eq!(outcome.target, 2);
        assert_eq!(outcome.recommissioned, vec!["old-1".to_string()]);
        assert_eq!(outcome.launched.len(), 1);
        assert!(endpoint.records().decommissioned().unwrap().is_empty());
        assert!(endpoint.records().marks("old-1").unwrap().is_empty());
        assert!(endpoint.records().confirmed_ips().unwrap().contains("10.6.0.1"));
    }

    #[tokio::test]
    async fn test_scale_down_prefers_inactive() {
        let host = TestHost::new();
        let mut config = memory_config();
        config.scaling.rules = vec!["instances<=1".to_string()];
        config.scaling.max_instances = 5;
        let mut endpoint = open_endpoint(&host, "web", &config);
        endpoint.action("start").unwrap();
        seed_serving(&host, &endpoint, &["i-1", "i-2", "i-3"]);

        let report = HealthReport {
            active_ids: vec!["i-1".to_string()],
            inactive_ids: vec!["i-2".to_string(), "i-3".to_string()],
            ..Default::default()
        };
        let outcome = endpoint
            .update(&LoadedMetrics::default(), &report)
            .await
            .unwrap();
        assert_eq!(outcome.target, 1);
        assert_eq!(outcome.decommissioned, vec!["i-2".to_string(), "i-3".to_string()]);
        let serving = endpoint.records().instances().unwrap();
        assert_eq!(serving.keys().collect::<Vec<_>>(), vec!["i-1"]);
        assert_eq!(
            endpoint.records().confirmed_ips().unwrap(),
            BTreeSet::from(["10.8.0.1".to_string()])
        );
        // Parked, not deleted.
        assert!(host.cloud.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_unconfirmed_candidate_deleted_directly() {
        let host = TestHost::new();
        let mut endpoint = open_endpoint(&host, "web", &memory_config());
        endpoint.action("stop").unwrap();
        let instance = Instance::new("i-9", "web-9", vec!["10.5.0.9".to_string()]);
        host.cloud.insert("web", instance.clone());
        endpoint.records().put_instance(&instance).unwrap();

        let outcome = endpoint
            .update(&LoadedMetrics::default(), &HealthReport::default())
            .await
            .unwrap();
        assert_eq!(outcome.deleted, vec!["i-9".to_string()]);
        assert!(endpoint.records().decommissioned().unwrap().is_empty());
        assert_eq!(host.cloud.deleted(), vec!["i-9".to_string()]);
    }

    #[tokio::test]
    async fn test_stopped_drains_and_settles() {
        let host = TestHost::new();
        let mut config = memory_config();
        config.scaling.ramp_limit = 1;
        let mut endpoint = open_endpoint(&host, "web", &config);
        seed_serving(&host, &endpoint, &["i-1", "i-2", "i-3"]);
        endpoint.action("stop").unwrap();

        // Scale to zero ignores the ramp limit.
        let outcome = endpoint
            .update(&LoadedMetrics::default(), &HealthReport::default())
            .await
            .unwrap();
        assert_eq!(outcome.target, 0);
        assert_eq!(outcome.decommissioned.len(), 3);

        for _ in 0..3 {
            let outcome = endpoint
                .update(&LoadedMetrics::default(), &HealthReport::default())
                .await
                .unwrap();
            assert_eq!(outcome.target, 0);
            assert_eq!(outcome.actions(), 0);
        }
    }

    #[tokio::test]
    async fn test_paused_is_frozen() {
        let host = TestHost::new();
        let mut endpoint = open_endpoint(&host, "web", &scenario_config(1, 20, 5));
        assert_eq!(endpoint.state(), EndpointState::Paused);
        let outcome = endpoint
            .update(&loaded(vec![rate_sample(300.0)], &["10.7.0.1"]), &HealthReport::default())
            .await
            .unwrap();
        assert_eq!(outcome.actions(), 0);
        assert_eq!(outcome.range, None);
    }

    #[tokio::test]
    async fn test_conflict_holds_and_logs_once() {
        let host = TestHost::new();
        let mut config = memory_config();
        config.scaling.rules = vec!["rate<=10".to_string(), "100<=rate".to_string()];
        config.scaling.max_instances = 50;
        let mut endpoint = open_endpoint(&host, "web", &config);
        endpoint.action("start").unwrap();

        for _ in 0..2 {
            let outcome = endpoint
                .update(&loaded(vec![rate_sample(300.0)], &["10.7.0.1"]), &HealthReport::default())
                .await
                .unwrap();
            assert!(matches!(outcome.range, Some(IdealRange::Conflict { .. })));
            assert_eq!(outcome.actions(), 0);
        }
        let conflicts = endpoint
            .log()
            .entries()
            .unwrap()
            .into_iter()
            .filter(|e| e.message.contains("conflict"))
            .count();
        assert_eq!(conflicts, 1);
    }

    #[tokio::test]
    async fn test_no_cloud_holds() {
        let host = TestHost::new();
        let mut config = scenario_config(1, 20, 5);
        config.cloud = None;
        let mut endpoint = open_endpoint(&host, "web", &config);
        endpoint.action("start").unwrap();
        let outcome = endpoint
            .update(&loaded(vec![rate_sample(300.0)], &["10.7.0.1"]), &HealthReport::default())
            .await
            .unwrap();
        assert_eq!(outcome.target, 0);
        assert_eq!(outcome.actions(), 0);
    }

    proptest! {
        #[test]
        fn clamp_never_inverts(
            ideal_min in 0u64..500,
            spread in 0u64..500,
            config_min in 0u64..100,
            config_spread in 0u64..100,
        ) {
            let (min, max) = clamp_target(ideal_min, ideal_min + spread, config_min, config_min + config_spread);
            prop_assert!(min <= max);
            prop_assert!(min >= config_min);
            prop_assert!(max <= config_min + config_spread);
        }
    }
}
