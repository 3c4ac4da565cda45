//! Audit-log events for one endpoint.

use std::fmt;

use ringscale_store::Severity;

#[derive(Debug, Clone, PartialEq)]
pub enum EndpointEvent {
    ConfigReloaded,
    ConfigRejected { reason: String },
    StateChanged { state: String },
    Scaling { current: u64, target: u64 },
    RuleConflict { min: u64, max: u64 },
    LaunchInstance { id: String, ips: Vec<String> },
    LaunchFailed { error: String },
    RecommissionInstance { id: String, ips: Vec<String> },
    DecommissionInstance { id: String, ips: Vec<String> },
    ErrorInstance { id: String, ips: Vec<String> },
    DeleteInstance { id: String, reason: &'static str },
    DeleteFailed { id: String, error: String },
    ForgetInstance { id: String },
    MarkInstance { id: String, label: &'static str, count: u32 },
    ConfirmIp { ip: String, reason: &'static str },
    DropIp { ip: String, reason: &'static str },
    SessionOpened { client: String, backend: String },
    SessionClosed { client: String },
    Reload { backends: usize },
    DriverFailed { driver: String, error: String },
}

impl EndpointEvent {
    pub fn severity(&self) -> Severity {
        match self {
            EndpointEvent::ConfigRejected { .. }
            | EndpointEvent::RuleConflict { .. }
            | EndpointEvent::LaunchFailed { .. }
            | EndpointEvent::DeleteFailed { .. }
            | EndpointEvent::ErrorInstance { .. }
            | EndpointEvent::MarkInstance { .. }
            | EndpointEvent::DriverFailed { .. } => Severity::Warn,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for EndpointEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointEvent::ConfigReloaded => write!(f, "configuration reloaded"),
            EndpointEvent::ConfigRejected { reason } => {
                write!(f, "configuration rejected, keeping the previous one: {reason}")
            }
            EndpointEvent::StateChanged { state } => write!(f, "state changed to {state}"),
            EndpointEvent::Scaling { current, target } => {
                write!(f, "scaling from {current} to {target} instances")
            }
            EndpointEvent::RuleConflict { min, max } => {
                write!(f, "scaling rules conflict (min {min} > max {max}), holding instance count")
            }
            EndpointEvent::LaunchInstance { id, ips } => {
                write!(f, "launched instance {id} {ips:?}")
            }
            EndpointEvent::LaunchFailed { error } => write!(f, "instance launch failed: {error}"),
            EndpointEvent::RecommissionInstance { id, ips } => {
                write!(f, "recommissioned instance {id} {ips:?}")
            }
            EndpointEvent::DecommissionInstance { id, ips } => {
                write!(f, "decommissioned instance {id} {ips:?}")
            }
            EndpointEvent::ErrorInstance { id, ips } => {
                write!(f, "pulled errored instance {id} {ips:?} from service")
            }
            EndpointEvent::DeleteInstance { id, reason } => {
                write!(f, "deleted instance {id} ({reason})")
            }
            EndpointEvent::DeleteFailed { id, error } => {
                write!(f, "failed to delete instance {id}: {error}")
            }
            EndpointEvent::ForgetInstance { id } => {
                write!(f, "forgot instance {id}, no longer reported by the cloud")
            }
            EndpointEvent::MarkInstance { id, label, count } => {
                write!(f, "instance {id} marked {label} ({count})")
            }
            EndpointEvent::ConfirmIp { ip, reason } => write!(f, "confirmed ip {ip} ({reason})"),
            EndpointEvent::DropIp { ip, reason } => write!(f, "dropped ip {ip} ({reason})"),
            EndpointEvent::SessionOpened { client, backend } => {
                write!(f, "session opened {client} -> {backend}")
            }
            EndpointEvent::SessionClosed { client } => write!(f, "session closed {client}"),
            EndpointEvent::Reload { backends } => {
                write!(f, "load balancer reloaded with {backends} backends")
            }
            EndpointEvent::DriverFailed { driver, error } => {
                write!(f, "driver {driver} failed: {error}")
            }
        }
    }
}
