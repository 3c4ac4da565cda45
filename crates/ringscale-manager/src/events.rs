//! Audit-log events for one manager.

use std::fmt;

use ringscale_store::Severity;

#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    Registered { uuid: String, keys: usize },
    Unregistered { uuid: String },
    Reconnected { uuid: String },
    DriverFailed { driver: String, error: String },
    RingChanged { tokens: usize, managers: usize },
    EndpointAdded { name: String },
    EndpointRemoved { name: String },
    EndpointCleaned { name: String },
    EndpointFailed { name: String, error: String },
    IpResolved { ip: String, endpoint: String },
    IpUnresolved { ip: String },
    IpDropped { ip: String, endpoint: Option<String> },
    IpErrored { ip: String, endpoint: Option<String> },
    SessionDropped { client: String, backend: String },
}

impl ManagerEvent {
    pub fn severity(&self) -> Severity {
        match self {
            ManagerEvent::DriverFailed { .. }
            | ManagerEvent::IpUnresolved { .. }
            | ManagerEvent::IpErrored { .. } => Severity::Warn,
            ManagerEvent::EndpointFailed { .. } => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for ManagerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerEvent::Registered { uuid, keys } => {
                write!(f, "manager {uuid} registered with {keys} ring keys")
            }
            ManagerEvent::Unregistered { uuid } => write!(f, "manager {uuid} unregistered"),
            ManagerEvent::Reconnected { uuid } => {
                write!(f, "manager {uuid} reconnected to the store")
            }
            ManagerEvent::DriverFailed { driver, error } => {
                write!(f, "driver {driver} unavailable: {error}")
            }
            ManagerEvent::RingChanged { tokens, managers } => {
                write!(f, "ring changed: {tokens} keys across {managers} managers")
            }
            ManagerEvent::EndpointAdded { name } => write!(f, "endpoint {name} added"),
            ManagerEvent::EndpointRemoved { name } => write!(f, "endpoint {name} removed"),
            ManagerEvent::EndpointCleaned { name } => write!(f, "endpoint {name} deleted"),
            ManagerEvent::EndpointFailed { name, error } => {
                write!(f, "endpoint {name} update failed: {error}")
            }
            ManagerEvent::IpResolved { ip, endpoint } => {
                write!(f, "registered ip {ip} for endpoint {endpoint}")
            }
            ManagerEvent::IpUnresolved { ip } => {
                write!(f, "registered ip {ip} matches no endpoint")
            }
            ManagerEvent::IpDropped { ip, endpoint: Some(endpoint) } => {
                write!(f, "dropped ip {ip} from endpoint {endpoint}")
            }
            ManagerEvent::IpDropped { ip, endpoint: None } => write!(f, "dropped ip {ip}"),
            ManagerEvent::IpErrored { ip, endpoint: Some(endpoint) } => {
                write!(f, "error reported for ip {ip} of endpoint {endpoint}")
            }
            ManagerEvent::IpErrored { ip, endpoint: None } => {
                write!(f, "error reported for ip {ip}, no serving instance owns it")
            }
            ManagerEvent::SessionDropped { client, backend } => {
                write!(f, "dropped session {client} -> {backend}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_and_display() {
        let failed = ManagerEvent::EndpointFailed {
            name: "web".to_string(),
            error: "boom".to_string(),
        };
        assert_eq!(failed.severity(), Severity::Error);
        assert_eq!(failed.to_string(), "endpoint web update failed: boom");

        let dropped = ManagerEvent::IpDropped {
            ip: "10.0.0.1".to_string(),
            endpoint: None,
        };
        assert_eq!(dropped.severity(), Severity::Info);
        assert_eq!(dropped.to_string(), "dropped ip 10.0.0.1");
        assert_eq!(
            ManagerEvent::IpUnresolved { ip: "10.0.0.9".to_string() }.severity(),
            Severity::Warn
        );

        let errored = ManagerEvent::IpErrored {
            ip: "10.0.0.2".to_string(),
            endpoint: Some("web".to_string()),
        };
        assert_eq!(errored.severity(), Severity::Warn);
        assert_eq!(errored.to_string(), "error reported for ip 10.0.0.2 of endpoint web");
    }
}
