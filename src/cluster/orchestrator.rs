/// Per-cluster lifecycle state machine
///
/// Every status is persisted before the phase it names starts, so a crashed
/// run can be resumed from the last recorded phase. Any failure after the
/// initial status checks leaves the record in `Error`.
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{Cluster, ConfigGetter, PersistStore, Status};
use crate::error::{EngineError, Result};
use crate::plugin::{Launcher, PluginHandle};
use crate::types::Driver;

pub struct Orchestrator {
    name: String,
    driver_name: String,
    driver: Arc<dyn Driver>,
    config: Arc<dyn ConfigGetter>,
    store: Arc<dyn PersistStore>,
    _plugin: Option<PluginHandle>,
}

impl Orchestrator {
    pub fn new(
        name: impl Into<String>,
        driver_name: impl Into<String>,
        driver: Arc<dyn Driver>,
        config: Arc<dyn ConfigGetter>,
        store: Arc<dyn PersistStore>,
    ) -> Self {
        Self {
            name: name.into(),
            driver_name: driver_name.into(),
            driver,
            config,
            store,
            _plugin: None,
        }
    }

    /// Bind to a launched plugin, keeping it alive as long as the orchestrator
    pub fn with_plugin(
        name: impl Into<String>,
        plugin: PluginHandle,
        config: Arc<dyn ConfigGetter>,
        store: Arc<dyn PersistStore>,
    ) -> Self {
        let driver_name = plugin.client().driver_name().to_string();
        let mut orchestrator = Self::new(name, driver_name, plugin.driver(), config, store);
        orchestrator._plugin = Some(plugin);
        orchestrator
    }

    /// Launch or locate `driver_name` and bind an orchestrator to it
    pub async fn launch(
        name: impl Into<String>,
        driver_name: &str,
        launcher: &Launcher,
        config: Arc<dyn ConfigGetter>,
        store: Arc<dyn PersistStore>,
    ) -> Result<Self> {
        let plugin = launcher.connect(driver_name).await?;
        Ok(Self::with_plugin(name, plugin, config, store))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Create the cluster, or resume a create that was interrupted
    pub async fn create(&self) -> Result<Cluster> {
        let mut cluster = if self.store.exists(&self.name).await? {
            self.store.load(&self.name).await?
        } else {
            Cluster::new(&self.name, &self.driver_name)
        };

        if cluster.driver_name != self.driver_name {
            return Err(EngineError::state_conflict(format!(
                "cluster {} was created with driver {}, not {}",
                self.name, cluster.driver_name, self.driver_name
            )));
        }

        match cluster.status {
            Some(Status::Running) | Some(Status::Updating) => {
                info!("Cluster {} already exists, nothing to create", self.name);
                return Ok(cluster);
            }
            Some(Status::Error) => {
                return Err(EngineError::state_conflict(format!(
                    "cluster {} previously failed to create; remove it before retrying",
                    self.name
                )));
            }
            Some(Status::PostCheck) => {
                info!("Resuming post-check of cluster {}", self.name);
                let result = self.finish(&mut cluster).await;
                return self.settle(cluster, result).await;
            }
            Some(Status::PreCreating) | Some(Status::Creating) | None => {}
        }

        info!("Creating cluster {} with driver {}", self.name, self.driver_name);
        let result = self.run_create(&mut cluster).await;
        self.settle(cluster, result).await
    }

    async fn run_create(&self, cluster: &mut Cluster) -> Result<()> {
        self.set_status(cluster, Status::PreCreating).await?;
        let opts = self.config.resolve().await?;

        self.set_status(cluster, Status::Creating).await?;
        let created = self.driver.create(&opts).await?;
        cluster.apply_cluster_info(created);

        self.finish(cluster).await
    }

    /// Update a provisioned cluster with freshly resolved options
    pub async fn update(&self) -> Result<Cluster> {
        let mut cluster = self.restore().await?;

        match cluster.status {
            Some(Status::Error) => {
                return Err(EngineError::state_conflict(format!(
                    "cluster {} is in error state and must be fixed before updating",
                    self.name
                )));
            }
            Some(status) if status.is_provisioned() => {}
            status => {
                return Err(EngineError::state_conflict(format!(
                    "cluster {} has not finished creating (status {})",
                    self.name,
                    status.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string())
                )));
            }
        }

        info!("Updating cluster {}", self.name);
        let result = self.run_update(&mut cluster).await;
        self.settle(cluster, result).await
    }

    async fn run_update(&self, cluster: &mut Cluster) -> Result<()> {
        let mut opts = self.config.resolve().await?;
        // Persisted driver context only fills keys the user left unset
        opts.merge_missing_strings(&cluster.metadata);

        let previous = cluster.to_cluster_info();
        self.set_status(cluster, Status::Updating).await?;
        let updated = self.driver.update(&previous, &opts).await?;
        cluster.apply_cluster_info(updated);

        self.finish(cluster).await
    }

    /// Tear the cluster down and delete its record
    ///
    /// The record is deleted even when the driver fails; the driver error is
    /// still returned.
    pub async fn remove(&self) -> Result<()> {
        let cluster = self.restore().await?;

        info!("Removing cluster {}", self.name);
        let removed = self.driver.remove(&cluster.to_cluster_info()).await;
        let deleted = self.store.delete(&self.name).await;

        match removed {
            Ok(()) => deleted,
            Err(e) if e.is_not_found() => {
                debug!("Cluster {} was already gone: {}", self.name, e);
                deleted
            }
            Err(e) => {
                if let Err(delete_err) = deleted {
                    warn!("Failed to delete record of cluster {}: {}", self.name, delete_err);
                }
                Err(e)
            }
        }
    }

    /// Load the persisted record
    pub async fn restore(&self) -> Result<Cluster> {
        if !self.store.exists(&self.name).await? {
            return Err(EngineError::UnknownCluster(self.name.clone()));
        }
        self.store.load(&self.name).await
    }

    /// PostCheck phase followed by the final Running transition
    async fn finish(&self, cluster: &mut Cluster) -> Result<()> {
        self.set_status(cluster, Status::PostCheck).await?;
        let checked = self.driver.post_check(&cluster.to_cluster_info()).await?;
        cluster.apply_cluster_info(checked);
        self.store.save(cluster).await?;

        self.set_status(cluster, Status::Running).await
    }

    async fn set_status(&self, cluster: &mut Cluster, status: Status) -> Result<()> {
        debug!("Cluster {} -> {}", cluster.name, status);
        cluster.status = Some(status);
        cluster.updated_at = Some(Utc::now());
        self.store.save_status(cluster, status).await
    }

    /// Turn a phase result into the caller's result, persisting Error on failure
    async fn settle(&self, mut cluster: Cluster, result: Result<()>) -> Result<Cluster> {
        let err = match result {
            Ok(()) => {
                info!("Cluster {} is running", self.name);
                return Ok(cluster);
            }
            Err(e) => e,
        };

        warn!("Cluster {} failed: {}", self.name, err);
        cluster.status = Some(Status::Error);
        cluster.updated_at = Some(Utc::now());
        match self.store.save_status(&cluster, Status::Error).await {
            Ok(()) => Err(err),
            Err(write_err) => Err(EngineError::StatusWriteFailed {
                cluster: self.name.clone(),
                status: Status::Error,
                cause: write_err.to_string(),
                original: Box::new(err),
            }),
        }
    }
}
