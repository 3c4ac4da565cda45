//! Shared types used across ringscale crates.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// One metric sample: `metric name -> (weight, value)`.
pub type Sample = BTreeMap<String, (f64, f64)>;

/// Samples reported by a single load balancer, keyed by backend IP.
pub type LocalMetrics = HashMap<String, Sample>;

/// Fleet-wide samples after merging every manager's report, keyed by
/// backend IP. A backend seen by several load balancers has several samples.
pub type MergedMetrics = HashMap<String, Vec<Sample>>;

/// Active client sessions: backend IP -> connected clients.
pub type SessionMap = HashMap<String, Vec<String>>;

/// Side-channel parameters a load balancer hands to a cloud launch.
pub type StartParams = BTreeMap<String, String>;

/// The metric whose value marks a backend as carrying live connections.
pub const ACTIVE_METRIC: &str = "active";

/// The synthetic metric folded in from pending-connection counters.
pub const PENDING_METRIC: &str = "pending";

/// Lifecycle state of a managed endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EndpointState {
    /// Scaling decisions are applied every tick.
    Running,
    /// Drain to zero instances, ignoring the ramp limit.
    Stopped,
    /// Instances are frozen in place.
    Paused,
}

impl EndpointState {
    /// Apply an operator action token. Unknown tokens leave the state as is.
    pub fn from_action(self, action: &str) -> Self {
        match action.trim().to_ascii_uppercase().as_str() {
            "START" => EndpointState::Running,
            "STOP" => EndpointState::Stopped,
            "PAUSE" => EndpointState::Paused,
            _ => self,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointState::Running => "RUNNING",
            EndpointState::Stopped => "STOPPED",
            EndpointState::Paused => "PAUSED",
        }
    }
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => Ok(EndpointState::Running),
            "STOPPED" => Ok(EndpointState::Stopped),
            "PAUSED" => Ok(EndpointState::Paused),
            other => Err(format!("unknown endpoint state: {other}")),
        }
    }
}

/// Health of an instance as the cloud sees it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    #[default]
    Ok,
    Error,
}

/// A backend compute unit as reported by a cloud driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Cloud-assigned identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Cloud-reported addresses. Empty right after launch on some clouds.
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default)]
    pub status: InstanceStatus,
}

impl Instance {
    pub fn new(id: impl Into<String>, name: impl Into<String>, ips: Vec<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ips,
            status: InstanceStatus::Ok,
        }
    }

    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_errored(&self) -> bool {
        self.status == InstanceStatus::Error
    }
}

/// One entry in a load balancer's backend list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Backend {
    pub ip: String,
    pub port: Option<u16>,
    pub weight: u32,
}

impl Backend {
    pub fn new(ip: impl Into<String>, port: Option<u16>, weight: u32) -> Self {
        Self {
            ip: ip.into(),
            port,
            weight,
        }
    }

    /// `ip:port`, or the bare IP when no port is configured.
    pub fn address(&self) -> String {
        match self.port {
            Some(port) if self.ip.contains(':') => format!("[{}]:{}", self.ip, port),
            Some(port) => format!("{}:{}", self.ip, port),
            None => self.ip.clone(),
        }
    }
}

/// Strip an optional port from a backend address.
///
/// Accepts `10.0.0.1`, `10.0.0.1:80`, `[fe80::1]:80` and bare IPv6.
pub fn ip_of(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match address.matches(':').count() {
        1 => address.split(':').next().unwrap_or(address),
        _ => address,
    }
}

/// Driver names a manager can serve.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub clouds: BTreeSet<String>,
    #[serde(default)]
    pub loadbalancers: BTreeSet<String>,
}

impl Capabilities {
    /// Whether this manager can serve an endpoint with the given drivers.
    /// An unset driver is always satisfied.
    pub fn supports(&self, cloud: Option<&str>, loadbalancer: Option<&str>) -> bool {
        cloud.is_none_or(|c| self.clouds.contains(c))
            && loadbalancer.is_none_or(|l| self.loadbalancers.contains(l))
    }
}

/// The liveness-bound record a manager publishes when it registers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerInfo {
    pub uuid: String,
    pub names: Vec<String>,
    pub keys: Vec<String>,
    pub capabilities: Capabilities,
    pub registered_at: u64,
}

/// Current epoch time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
