//! Endpoint, manager and daemon configuration.
//!
//! Endpoint and manager documents live in the coordination store as JSON.
//! The daemon reads its own bootstrap file as TOML.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::hash::sha_hash;
use crate::types::{EndpointState, ip_of};

/// Scaling bounds and rules for one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    pub min_instances: u32,
    pub max_instances: u32,
    /// Criteria strings such as `20<=rate<=50` or `2<=instances`.
    pub rules: Vec<String>,
    /// Maximum launch/decommission operations per tick.
    pub ramp_limit: u32,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_instances: 1,
            max_instances: 1,
            rules: Vec::new(),
            ramp_limit: 5,
        }
    }
}

impl ScalingConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.min_instances > self.max_instances {
            return Err(ConfigError::invalid(
                "scaling.min_instances",
                format!(
                    "min_instances ({}) exceeds max_instances ({})",
                    self.min_instances, self.max_instances
                ),
            ));
        }
        if self.ramp_limit == 0 {
            return Err(ConfigError::invalid("scaling.ramp_limit", "must be positive"));
        }
        for rule in &self.rules {
            if rule.trim().is_empty() {
                return Err(ConfigError::Rule {
                    rule: rule.clone(),
                    reason: "empty rule".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Configuration of one managed endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Public URL served by the load balancer.
    pub url: Option<String>,
    /// Backend port. `None` lets the load balancer pick.
    pub port: Option<u16>,
    pub weight: u32,
    /// Cloud driver name.
    pub cloud: Option<String>,
    /// Load-balancer driver name.
    pub loadbalancer: Option<String>,
    /// Fixed backends that are always in the load balancer list.
    pub static_instances: Vec<String>,
    pub auth_hash: Option<String>,
    /// Health-check ticks before a marked instance is deleted.
    pub marks: u32,
    /// State assumed while no state has been recorded for the endpoint.
    pub initial_state: EndpointState,
    /// Scale on another endpoint's backend metrics.
    pub metrics_source: Option<String>,
    /// Publish another endpoint's backends through this endpoint's URL.
    pub instances_source: Option<String>,
    pub scaling: ScalingConfig,
    /// Per-driver configuration sections, keyed by driver name.
    pub drivers: BTreeMap<String, serde_json::Value>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: None,
            port: None,
            weight: 1,
            cloud: None,
            loadbalancer: None,
            static_instances: Vec::new(),
            auth_hash: None,
            marks: 3,
            initial_state: EndpointState::Paused,
            metrics_source: None,
            instances_source: None,
            scaling: ScalingConfig::default(),
            drivers: BTreeMap::new(),
        }
    }
}

impl EndpointConfig {
    /// Ring key for this endpoint.
    ///
    /// URL-less endpoints hash their load-balancer name; endpoints with
    /// neither all land on the hash of the empty string.
    pub fn key(&self) -> String {
        let basis = self
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or(self.loadbalancer.as_deref())
            .unwrap_or("");
        sha_hash(basis)
    }

    /// Driver-specific section, or `null` when none is configured.
    pub fn driver_section(&self, driver: &str) -> serde_json::Value {
        self.drivers
            .get(driver)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }

    /// Static backend IPs, ports stripped.
    pub fn static_ips(&self) -> Vec<String> {
        self.static_instances
            .iter()
            .map(|s| ip_of(s.trim()).to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Whether switching to `other` changes which managers may own it.
    pub fn placement_changed(&self, other: &EndpointConfig) -> bool {
        self.cloud != other.cloud
            || self.loadbalancer != other.loadbalancer
            || self.key() != other.key()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(url) = &self.url {
            if url.is_empty() || url.chars().any(char::is_whitespace) {
                return Err(ConfigError::invalid("url", format!("malformed url {url:?}")));
            }
        }
        if self.port == Some(0) {
            return Err(ConfigError::invalid("port", "must be between 1 and 65535"));
        }
        if self.weight == 0 || self.weight > 1000 {
            return Err(ConfigError::invalid("weight", "must be between 1 and 1000"));
        }
        if self.marks == 0 {
            return Err(ConfigError::invalid("marks", "must be positive"));
        }
        for entry in &self.static_instances {
            let ip = ip_of(entry.trim());
            if ip.parse::<IpAddr>().is_err() {
                return Err(ConfigError::invalid(
                    "static_instances",
                    format!("{entry:?} is not an IP address"),
                ));
            }
        }
        self.scaling.validate()
    }
}

/// Configuration of one manager, stored under each of its names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Load-balancer drivers to run.
    pub loadbalancers: Vec<String>,
    /// Cloud drivers to run.
    pub clouds: Vec<String>,
    /// Control-loop period in seconds.
    pub interval_secs: u64,
    /// Ring tokens to hold.
    pub keys: usize,
    /// Per-driver configuration sections, keyed by driver name.
    pub drivers: BTreeMap<String, serde_json::Value>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            loadbalancers: Vec::new(),
            clouds: Vec::new(),
            interval_secs: 10,
            keys: 64,
            drivers: BTreeMap::new(),
        }
    }
}

impl ManagerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn driver_section(&self, driver: &str) -> serde_json::Value {
        self.drivers
            .get(driver)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }

    /// Overlay `other` on top of `self`. Driver lists are unioned, driver
    /// sections and scalar settings from `other` win.
    pub fn merge(&mut self, other: ManagerConfig) {
        for lb in other.loadbalancers {
            if !self.loadbalancers.contains(&lb) {
                self.loadbalancers.push(lb);
            }
        }
        for cloud in other.clouds {
            if !self.clouds.contains(&cloud) {
                self.clouds.push(cloud);
            }
        }
        self.interval_secs = other.interval_secs;
        self.keys = other.keys;
        self.drivers.extend(other.drivers);
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.interval_secs == 0 {
            return Err(ConfigError::invalid("interval_secs", "must be positive"));
        }
        Ok(())
    }
}

/// An endpoint to create at daemon start if it does not exist yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSeed {
    pub name: String,
    #[serde(default)]
    pub config: EndpointConfig,
    pub state: Option<EndpointState>,
}

/// `ringscale.toml`: the daemon's local bootstrap file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    /// Stable names for the managers started by this daemon.
    pub names: Vec<String>,
    /// Number of manager processes to host in this daemon.
    pub managers: usize,
    pub log_json: bool,
    /// Written to `managers/configs/{name}` for names without a config.
    pub manager: Option<ManagerConfig>,
    pub endpoints: Vec<EndpointSeed>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/ringscale"),
            names: vec!["default".to_string()],
            managers: 1,
            log_json: false,
            manager: None,
            endpoints: Vec::new(),
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.managers == 0 {
            return Err(ConfigError::invalid("managers", "must be positive"));
        }
        if let Some(manager) = &self.manager {
            manager.validate()?;
        }
        for seed in &self.endpoints {
            if seed.name.is_empty() || seed.name.contains('/') {
                return Err(ConfigError::invalid(
                    "endpoints.name",
                    format!("{:?} is not a valid endpoint name", seed.name),
                ));
            }
            seed.config.validate()?;
        }
        Ok(())
    }
}
