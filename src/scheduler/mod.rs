//! Scheduler module: one independent polling loop per watched host.

mod instance;
mod listener;

pub use instance::*;
pub use listener::*;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use thiserror::Error;
use tokio::sync::{broadcast, watch, RwLock};

use crate::config::{ConfigError, InstanceConfig};
use crate::fetch::FetchError;
use crate::snapshot::DigestSource;

/// Scheduler error types.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("host {0} is already being watched")]
    AlreadyRunning(String),
    #[error("no host with id {0}")]
    NotFound(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Handles to one running instance.
struct InstanceHandle {
    stop_tx: broadcast::Sender<()>,
    config_tx: watch::Sender<InstanceConfig>,
    status: SharedStatus,
}

/// The scheduler that owns all host instances.
///
/// Instances share nothing but this registry: each has its own loop, its
/// own reconciler state and its own published status.
pub struct Scheduler {
    instances: Arc<RwLock<HashMap<String, InstanceHandle>>>,
    listener: Arc<dyn ReconcileListener>,
    digests: Arc<dyn DigestSource>,
}

impl Scheduler {
    /// Create a new scheduler.
    pub fn new(listener: Arc<dyn ReconcileListener>, digests: Arc<dyn DigestSource>) -> Self {
        Self {
            instances: Arc::new(RwLock::new(HashMap::new())),
            listener,
            digests,
        }
    }

    /// Start watching all given hosts.
    pub async fn start(&self, hosts: Vec<InstanceConfig>) -> Result<(), SchedulerError> {
        tracing::info!("Starting scheduler with {} hosts", hosts.len());

        for host in hosts {
            self.add_instance(host).await?;
        }

        Ok(())
    }

    /// Start watching a host.
    pub async fn add_instance(&self, config: InstanceConfig) -> Result<(), SchedulerError> {
        let config = config.normalized()?;
        let mut instances = self.instances.write().await;

        if instances.contains_key(&config.id) {
            return Err(SchedulerError::AlreadyRunning(config.id));
        }

        let status = Arc::new(StdRwLock::new(InstanceStatus::new(config.clone())));
        let runner = InstanceRunner::new(
            config.clone(),
            self.digests.clone(),
            self.listener.clone(),
            status.clone(),
        )?;

        let (stop_tx, stop_rx) = broadcast::channel(1);
        let (config_tx, config_rx) = watch::channel(config.clone());
        instances.insert(
            config.id.clone(),
            InstanceHandle {
                stop_tx,
                config_tx,
                status,
            },
        );
        drop(instances);

        tracing::info!("Scheduler: watching {} at {}", config.name, config.url);

        tokio::spawn(run_instance_loop(runner, config_rx, stop_rx));

        Ok(())
    }

    /// Stop watching a host and drop its state.
    pub async fn remove_instance(&self, id: &str) -> Result<(), SchedulerError> {
        let handle = self
            .instances
            .write()
            .await
            .remove(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;

        let _ = handle.stop_tx.send(());
        tracing::info!("Scheduler: removed host {}", id);
        Ok(())
    }

    /// Change a host's options; applied before its next tick.
    ///
    /// The id cannot change.
    pub async fn reconfigure(
        &self,
        id: &str,
        config: InstanceConfig,
    ) -> Result<InstanceConfig, SchedulerError> {
        let config = InstanceConfig {
            id: id.to_string(),
            ..config
        }
        .normalized()?;

        let instances = self.instances.read().await;
        let handle = instances
            .get(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;

        handle.config_tx.send_replace(config.clone());
        Ok(config)
    }

    /// Current status of one host.
    pub async fn status(&self, id: &str) -> Option<InstanceStatus> {
        let instances = self.instances.read().await;
        instances.get(id).map(|h| read_status(&h.status))
    }

    /// Current status of every host, ordered by id.
    pub async fn statuses(&self) -> Vec<InstanceStatus> {
        let instances = self.instances.read().await;
        let mut statuses: Vec<InstanceStatus> =
            instances.values().map(|h| read_status(&h.status)).collect();
        statuses.sort_by(|a, b| a.config.id.cmp(&b.config.id));
        statuses
    }

    /// Stop every instance.
    pub async fn stop(&self) {
        let mut instances = self.instances.write().await;
        for (id, handle) in instances.drain() {
            let _ = handle.stop_tx.send(());
            tracing::debug!("Scheduler: stopping {}", id);
        }
    }
}

fn read_status(status: &SharedStatus) -> InstanceStatus {
    status.read().unwrap_or_else(PoisonError::into_inner).clone()
}
