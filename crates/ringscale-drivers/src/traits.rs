//! Cloud and load-balancer driver interfaces.

use std::collections::HashMap;

use async_trait::async_trait;

use ringscale_core::{Backend, EndpointConfig, Instance, LocalMetrics, SessionMap, StartParams};

use crate::error::DriverResult;

/// Starts, lists and deletes the instances behind one endpoint.
///
/// Every call is scoped by the endpoint's name and configuration; the
/// driver finds its own section in `config.drivers`.
#[async_trait]
pub trait CloudDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Every instance the cloud currently runs for this endpoint.
    async fn list_instances(
        &self,
        endpoint: &str,
        config: &EndpointConfig,
    ) -> DriverResult<Vec<Instance>>;

    /// Launch one instance. The returned instance carries whatever
    /// addresses the cloud already knows, which may be none.
    async fn start_instance(
        &self,
        endpoint: &str,
        config: &EndpointConfig,
        params: &StartParams,
    ) -> DriverResult<Instance>;

    async fn delete_instance(
        &self,
        endpoint: &str,
        config: &EndpointConfig,
        instance_id: &str,
    ) -> DriverResult<()>;
}

/// Renders backend lists and reports what it observes.
#[async_trait]
pub trait LoadBalancerDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Replace the backend list served for `url`.
    async fn change(
        &self,
        url: &str,
        backends: &[Backend],
        config: &EndpointConfig,
    ) -> DriverResult<()>;

    /// Apply every pending `change`, e.g. by reloading an external daemon.
    async fn save(&self) -> DriverResult<()>;

    /// Per-backend samples: ip -> metric -> (weight, value).
    async fn metrics(&self) -> DriverResult<LocalMetrics>;

    /// Connections queued per URL with no backend to take them.
    async fn pending(&self) -> DriverResult<HashMap<String, u64>>;

    /// Open sessions: backend ip -> clients.
    async fn sessions(&self) -> DriverResult<SessionMap> {
        Ok(SessionMap::new())
    }

    async fn drop_session(&self, client: &str, backend: &str) -> DriverResult<()> {
        let _ = (client, backend);
        Ok(())
    }

    /// Parameters handed to the cloud when launching for this endpoint.
    async fn start_params(&self, config: &EndpointConfig) -> DriverResult<StartParams> {
        let _ = config;
        Ok(StartParams::new())
    }

    /// Undo `start_params` after a failed launch.
    async fn cleanup_start_params(
        &self,
        config: &EndpointConfig,
        params: &StartParams,
    ) -> DriverResult<()> {
        let _ = (config, params);
        Ok(())
    }

    /// Release anything held for a deleted instance.
    async fn cleanup(&self, config: &EndpointConfig, instance_name: &str) -> DriverResult<()> {
        let _ = (config, instance_name);
        Ok(())
    }

    /// A backend IP left the fleet.
    async fn dropped(&self, ip: &str) -> DriverResult<()> {
        let _ = ip;
        Ok(())
    }
}
