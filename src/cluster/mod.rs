/// Cluster record, lifecycle status and the ports the orchestrator consumes
mod orchestrator;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{ClusterInfo, DriverOptions};

pub use orchestrator::Orchestrator;

/// Lifecycle status, advanced only by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    PreCreating,
    Creating,
    PostCheck,
    Running,
    Error,
    Updating,
}

impl Status {
    /// Creation has produced a cluster that updates may act on
    pub fn is_provisioned(self) -> bool {
        matches!(self, Status::PostCheck | Status::Running | Status::Updating)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::PreCreating => "PreCreating",
            Status::Creating => "Creating",
            Status::PostCheck => "PostCheck",
            Status::Running => "Running",
            Status::Error => "Error",
            Status::Updating => "Updating",
        };
        write!(f, "{}", name)
    }
}

/// Persisted view of one cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    pub driver_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,

    /// Kubernetes version
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Kubernetes API endpoint
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account_token: String,
    /// HTTP basic auth
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    /// Base64 encoded
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub root_ca_cert: String,
    /// Base64 encoded
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_certificate: String,
    /// Base64 encoded
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_key: String,
    #[serde(default)]
    pub node_count: i64,

    /// Driver-private state; opaque to the engine
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

const REDACTED: &str = "Redacted";

impl Cluster {
    pub fn new(name: impl Into<String>, driver_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver_name: driver_name.into(),
            status: None,
            version: String::new(),
            endpoint: String::new(),
            service_account_token: String::new(),
            username: String::new(),
            password: String::new(),
            root_ca_cert: String::new(),
            client_certificate: String::new(),
            client_key: String::new(),
            node_count: 0,
            metadata: HashMap::new(),
            updated_at: None,
        }
    }

    /// Copy a driver result onto this record
    pub fn apply_cluster_info(&mut self, info: ClusterInfo) {
        self.client_certificate = info.client_certificate;
        self.client_key = info.client_key;
        self.root_ca_cert = info.root_ca_certificate;
        self.username = info.username;
        self.password = info.password;
        self.version = info.version;
        self.endpoint = info.endpoint;
        self.node_count = info.node_count;
        self.metadata = info.metadata;
        self.service_account_token = info.service_account_token;
    }

    /// The record as the driver sees it; status is deliberately absent
    pub fn to_cluster_info(&self) -> ClusterInfo {
        ClusterInfo {
            version: self.version.clone(),
            service_account_token: self.service_account_token.clone(),
            endpoint: self.endpoint.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            root_ca_certificate: self.root_ca_cert.clone(),
            client_certificate: self.client_certificate.clone(),
            client_key: self.client_key.clone(),
            node_count: self.node_count,
            metadata: self.metadata.clone(),
        }
    }

    /// Copy with secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mask = |value: &str| {
            if value.is_empty() {
                String::new()
            } else {
                REDACTED.to_string()
            }
        };
        Self {
            password: mask(&self.password),
            service_account_token: mask(&self.service_account_token),
            root_ca_cert: mask(&self.root_ca_cert),
            client_certificate: mask(&self.client_certificate),
            client_key: mask(&self.client_key),
            ..self.clone()
        }
    }
}

/// Storage for cluster records
///
/// Implementations must keep records of different names independent; callers
/// serialize operations on the same name.
#[async_trait]
pub trait PersistStore: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool>;

    async fn load(&self, name: &str) -> Result<Cluster>;

    async fn save(&self, cluster: &Cluster) -> Result<()>;

    /// Persist `cluster` with `status` as its current status
    async fn save_status(&self, cluster: &Cluster, status: Status) -> Result<()>;

    async fn delete(&self, name: &str) -> Result<()>;
}

/// Resolves user configuration into an Option Bag
#[async_trait]
pub trait ConfigGetter: Send + Sync {
    async fn resolve(&self) -> Result<DriverOptions>;
}
