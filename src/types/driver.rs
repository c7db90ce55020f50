/// The contract every cluster driver implements
use async_trait::async_trait;

use super::capabilities::{Capabilities, Capability};
use super::flags::DriverFlags;
use super::info::{ClusterInfo, KubernetesVersion, NodeCount};
use super::options::DriverOptions;
use crate::error::{EngineError, Result};

/// A pluggable provisioning backend
///
/// The same trait is implemented by concrete drivers and by the RPC client, so
/// callers cannot tell an in-process driver from one behind a plugin boundary.
/// Drivers own their retry policy; any error returned here is terminal for the
/// current call.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Options accepted by `create`. Static, no side effects.
    async fn create_options(&self) -> Result<DriverFlags>;

    /// Options accepted by `update`; may omit immutable create options.
    async fn update_options(&self) -> Result<DriverFlags>;

    /// Provision a cluster. "Already exists" must not be fatal.
    async fn create(&self, opts: &DriverOptions) -> Result<ClusterInfo>;

    /// Change a cluster, starting from the previously persisted info
    async fn update(&self, info: &ClusterInfo, opts: &DriverOptions) -> Result<ClusterInfo>;

    /// Post-provisioning work against the live cluster. Must be idempotent.
    async fn post_check(&self, info: &ClusterInfo) -> Result<ClusterInfo>;

    /// Tear a cluster down. A missing cluster counts as removed.
    async fn remove(&self, info: &ClusterInfo) -> Result<()>;

    /// Optional operations this driver implements
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn get_version(&self, _info: &ClusterInfo) -> Result<KubernetesVersion> {
        Err(EngineError::Unsupported(Capability::GetVersion))
    }

    async fn set_version(&self, _info: &ClusterInfo, _version: &KubernetesVersion) -> Result<()> {
        Err(EngineError::Unsupported(Capability::SetVersion))
    }

    async fn get_cluster_size(&self, _info: &ClusterInfo) -> Result<NodeCount> {
        Err(EngineError::Unsupported(Capability::GetClusterSize))
    }

    async fn set_cluster_size(&self, _info: &ClusterInfo, _size: &NodeCount) -> Result<()> {
        Err(EngineError::Unsupported(Capability::SetClusterSize))
    }
}
