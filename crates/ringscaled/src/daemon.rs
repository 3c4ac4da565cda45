//! Daemon assembly: store, bootstrap seeding and the manager tasks.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use ringscale_core::DaemonConfig;
use ringscale_endpoint::validate_config;
use ringscale_manager::{ManagerResult, ScaleManager};
use ringscale_store::{CoordinationStore, EmbeddedStore, EndpointDirectory, ManagerRecords};

/// Read the bootstrap file, or fall back to defaults when none is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<DaemonConfig> {
    match path {
        Some(path) => DaemonConfig::from_file(path),
        None => Ok(DaemonConfig::default()),
    }
}

/// Full validation, scaling rules of every seeded endpoint included.
pub fn check(config: &DaemonConfig) -> anyhow::Result<()> {
    config.validate()?;
    for seed in &config.endpoints {
        validate_config(&seed.config)
            .map_err(|e| anyhow::anyhow!("endpoint {}: {e}", seed.name))?;
    }
    Ok(())
}

/// What `seed` wrote.
#[derive(Debug, Default, PartialEq)]
pub struct Seeded {
    pub manager_configs: Vec<String>,
    pub endpoints: Vec<String>,
}

/// Write the bootstrap manager config and endpoints the store does not
/// know yet. Existing records always win over the file.
pub fn seed(store: Arc<dyn CoordinationStore>, config: &DaemonConfig) -> anyhow::Result<Seeded> {
    let mut seeded = Seeded::default();

    let records = ManagerRecords::new(store.clone());
    for name in &config.names {
        if records.config(name)?.is_some() {
            continue;
        }
        let manager = config.manager.clone().unwrap_or_default();
        records.set_config(name, &manager)?;
        info!(%name, "manager config seeded");
        seeded.manager_configs.push(name.clone());
    }

    let directory = EndpointDirectory::new(store);
    for endpoint in &config.endpoints {
        let records = directory.records(&endpoint.name);
        if records.config()?.is_some() {
            continue;
        }
        directory.manage(&endpoint.name, &endpoint.config)?;
        if let Some(state) = endpoint.state {
            records.set_state(state)?;
        }
        seeded.endpoints.push(endpoint.name.clone());
    }
    Ok(seeded)
}

type ManagerTask = (Arc<ScaleManager>, JoinHandle<ManagerResult<()>>);

/// Start `config.managers` managers, each on its own store session.
pub fn spawn_managers(
    store: &EmbeddedStore,
    config: &DaemonConfig,
    shutdown: &watch::Receiver<bool>,
) -> anyhow::Result<Vec<ManagerTask>> {
    let mut tasks = Vec::with_capacity(config.managers);
    for _ in 0..config.managers {
        let client: Arc<dyn CoordinationStore> = Arc::new(store.client()?);
        let manager = Arc::new(ScaleManager::new(client, config.names.clone()));
        info!(manager = %manager.uuid(), names = ?config.names, "manager starting");
        let runner = manager.clone();
        let shutdown = shutdown.clone();
        let handle = tokio::spawn(async move { runner.run(shutdown).await });
        tasks.push((manager, handle));
    }
    Ok(tasks)
}

/// Wait for every manager task, logging the ones that failed.
pub async fn join_managers(tasks: Vec<ManagerTask>) {
    for (manager, handle) in tasks {
        match handle.await {
            Ok(Ok(())) => info!(manager = %manager.uuid(), "manager stopped"),
            Ok(Err(e)) => error!(manager = %manager.uuid(), error = %e, "manager failed"),
            Err(e) => error!(manager = %manager.uuid(), error = %e, "manager task panicked"),
        }
    }
}

pub async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    check(&config)?;
    info!(managers = config.managers, "ringscale daemon starting");

    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.data_dir.join("ringscale.redb");
    let store = EmbeddedStore::open(&db_path)?;
    info!(path = ?db_path, "coordination store opened");

    let seeded = seed(Arc::new(store.client()?), &config)?;
    if !seeded.endpoints.is_empty() {
        info!(endpoints = ?seeded.endpoints, "endpoints seeded");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = spawn_managers(&store, &config, &shutdown_rx)?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c, shutting down");
    }
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    join_managers(tasks).await;

    info!("ringscale daemon stopped");
    Ok(())
}
