//! The coordination-store namespace.
//!
//! ```text
//! managers/keys/{key}              ephemeral  ring token -> manager uuid
//! managers/info/{uuid}             ephemeral  ManagerInfo
//! managers/configs/{name}          persistent ManagerConfig
//! managers/metrics/{uuid}          ephemeral  load-balancer metrics
//! managers/pending/{uuid}          ephemeral  pending connections per url
//! managers/active/{uuid}           ephemeral  active connection total
//! managers/logs/{name}/entry-N     persistent event log
//! endpoints/{name}/...             see `endpoint_*`
//! ip-registration/{new,drop}/{ip}  persistent registration inbox
//! ip-registration/error/{ip}       persistent backend error reports
//! ip-addresses/{ip}                persistent ip -> endpoint name
//! sessions/drop/{client}           persistent session drop requests
//! loadbalancers/{driver}/locks/{ip}
//! url, auth-hash                   global singletons
//! ```

pub const MANAGER_KEYS: &str = "managers/keys";
pub const MANAGER_INFO: &str = "managers/info";
pub const MANAGER_CONFIGS: &str = "managers/configs";
pub const MANAGER_METRICS: &str = "managers/metrics";
pub const MANAGER_PENDING: &str = "managers/pending";
pub const MANAGER_ACTIVE: &str = "managers/active";
pub const MANAGER_LOGS: &str = "managers/logs";
pub const ENDPOINTS: &str = "endpoints";
pub const IP_NEW: &str = "ip-registration/new";
pub const IP_DROP: &str = "ip-registration/drop";
pub const IP_ERROR: &str = "ip-registration/error";
pub const IP_ADDRESSES: &str = "ip-addresses";
pub const SESSION_DROPS: &str = "sessions/drop";
pub const LOADBALANCERS: &str = "loadbalancers";
pub const URL: &str = "url";
pub const AUTH_HASH: &str = "auth-hash";

/// Make an arbitrary string safe to use as a single path segment.
pub fn segment(raw: &str) -> String {
    raw.replace('%', "%25").replace('/', "%2F")
}

/// Inverse of [`segment`].
pub fn unsegment(encoded: &str) -> String {
    encoded.replace("%2F", "/").replace("%25", "%")
}

pub fn manager_key(key: &str) -> String {
    format!("{MANAGER_KEYS}/{key}")
}

pub fn manager_info(uuid: &str) -> String {
    format!("{MANAGER_INFO}/{uuid}")
}

pub fn manager_config(name: &str) -> String {
    format!("{MANAGER_CONFIGS}/{}", segment(name))
}

pub fn manager_metrics(uuid: &str) -> String {
    format!("{MANAGER_METRICS}/{uuid}")
}

pub fn manager_pending(uuid: &str) -> String {
    format!("{MANAGER_PENDING}/{uuid}")
}

pub fn manager_active(uuid: &str) -> String {
    format!("{MANAGER_ACTIVE}/{uuid}")
}

pub fn manager_log(name: &str) -> String {
    format!("{MANAGER_LOGS}/{}", segment(name))
}

pub fn endpoint(name: &str) -> String {
    format!("{ENDPOINTS}/{}", segment(name))
}

pub fn endpoint_config(name: &str) -> String {
    format!("{}/config", endpoint(name))
}

pub fn endpoint_state(name: &str) -> String {
    format!("{}/state", endpoint(name))
}

pub fn endpoint_manager(name: &str) -> String {
    format!("{}/manager", endpoint(name))
}

pub fn endpoint_deleting(name: &str) -> String {
    format!("{}/deleting", endpoint(name))
}

pub fn endpoint_confirmed_ips(name: &str) -> String {
    format!("{}/confirmed-ips", endpoint(name))
}

pub fn endpoint_instances(name: &str) -> String {
    format!("{}/instances", endpoint(name))
}

pub fn endpoint_decommissioned(name: &str) -> String {
    format!("{}/decommissioned", endpoint(name))
}

pub fn endpoint_errored(name: &str) -> String {
    format!("{}/errored", endpoint(name))
}

pub fn endpoint_marked(name: &str) -> String {
    format!("{}/marked", endpoint(name))
}

pub fn endpoint_custom_metrics(name: &str) -> String {
    format!("{}/custom-metrics", endpoint(name))
}

pub fn endpoint_ip_metrics(name: &str) -> String {
    format!("{}/ip-metrics", endpoint(name))
}

pub fn endpoint_live_metrics(name: &str) -> String {
    format!("{}/live-metrics", endpoint(name))
}

pub fn endpoint_live_active(name: &str) -> String {
    format!("{}/live-active", endpoint(name))
}

pub fn endpoint_sessions(name: &str) -> String {
    format!("{}/sessions", endpoint(name))
}

pub fn endpoint_log(name: &str) -> String {
    format!("{}/log", endpoint(name))
}

pub fn ip_new(ip: &str) -> String {
    format!("{IP_NEW}/{}", segment(ip))
}

pub fn ip_drop(ip: &str) -> String {
    format!("{IP_DROP}/{}", segment(ip))
}

pub fn ip_error(ip: &str) -> String {
    format!("{IP_ERROR}/{}", segment(ip))
}

pub fn ip_address(ip: &str) -> String {
    format!("{IP_ADDRESSES}/{}", segment(ip))
}

pub fn session_drop(client: &str) -> String {
    format!("{SESSION_DROPS}/{}", segment(client))
}

pub fn loadbalancer_locks(driver: &str) -> String {
    format!("{LOADBALANCERS}/{}/locks", segment(driver))
}

/// Join a parent path and an arbitrary child name.
pub fn child(parent: &str, name: &str) -> String {
    format!("{parent}/{}", segment(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_paths() {
        assert_eq!(endpoint_config("web"), "endpoints/web/config");
        assert_eq!(child(&endpoint_instances("web"), "i-1"), "endpoints/web/instances/i-1");
        assert_eq!(loadbalancer_locks("nginx"), "loadbalancers/nginx/locks");
    }

    #[test]
    fn test_segment_escapes_slashes() {
        let raw = "http://web/a%b";
        let encoded = segment(raw);
        assert!(!encoded.contains('/'));
        assert_eq!(unsegment(&encoded), raw);
    }
}
