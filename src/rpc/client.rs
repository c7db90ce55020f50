/// Plugin client: the driver contract over HTTP with per-call budgets
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use super::messages::{
    CallTimeouts, Empty, ErrorResponse, Operation, PluginInfo, SetClusterSizeRequest,
    SetVersionRequest, UpdateRequest, PROTOCOL_VERSION,
};
use crate::error::{EngineError, Result};
use crate::types::{
    Capabilities, Capability, ClusterInfo, Driver, DriverFlags, DriverOptions, KubernetesVersion,
    NodeCount,
};

/// Remote driver reached through a plugin server
#[derive(Clone)]
pub struct DriverClient {
    client: Client,
    base: Url,
    driver_name: String,
    timeouts: CallTimeouts,
    capabilities: Capabilities,
}

impl DriverClient {
    /// Dial a plugin and negotiate protocol version and capabilities
    pub async fn connect(driver_name: &str, addr: &str, timeouts: CallTimeouts) -> Result<Self> {
        let mut client = Self::new(driver_name, addr, timeouts)?;
        let info = client.handshake().await?;

        if info.protocol_version != PROTOCOL_VERSION {
            return Err(EngineError::transport(format!(
                "plugin at {} speaks protocol {} but {} is required",
                addr, info.protocol_version, PROTOCOL_VERSION
            )));
        }
        if info.driver_name != driver_name {
            return Err(EngineError::transport(format!(
                "plugin at {} serves driver {} instead of {}",
                addr, info.driver_name, driver_name
            )));
        }

        client.capabilities = info.capabilities;
        debug!(
            "Connected to driver {} at {} (capabilities: {:?})",
            driver_name,
            client.base,
            client.capabilities.iter().collect::<Vec<_>>()
        );
        Ok(client)
    }

    /// Build a client without contacting the plugin
    pub fn new(driver_name: &str, addr: &str, timeouts: CallTimeouts) -> Result<Self> {
        if addr.is_empty() {
            return Err(EngineError::transport(format!(
                "no plugin address for driver {}",
                driver_name
            )));
        }
        let base = parse_base_url(addr)?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| EngineError::transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base,
            driver_name: driver_name.to_string(),
            timeouts,
            capabilities: Capabilities::default(),
        })
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    pub fn address(&self) -> &Url {
        &self.base
    }

    pub async fn handshake(&self) -> Result<PluginInfo> {
        self.call(Operation::Handshake, None::<&Empty>).await
    }

    /// Issue one call, failing with a timeout once its budget elapses
    async fn call<B: Serialize, R: DeserializeOwned>(
        &self,
        operation: Operation,
        body: Option<&B>,
    ) -> Result<R> {
        let url = self
            .base
            .join(&operation.path())
            .map_err(|e| EngineError::transport(format!("invalid plugin url: {}", e)))?;
        let budget = operation.budget(&self.timeouts);
        debug!("{} {} (budget {}s)", operation.name(), url, budget.as_secs());

        let request = match body {
            Some(body) => self.client.post(url).json(body),
            None => self.client.get(url),
        };

        let response = request.timeout(budget).send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout {
                    operation: operation.name(),
                    budget,
                }
            } else {
                EngineError::transport(format!("{} request failed: {}", operation.name(), e))
            }
        })?;

        self.handle_response(operation, budget, response).await
    }

    async fn handle_response<R: DeserializeOwned>(
        &self,
        operation: Operation,
        budget: std::time::Duration,
        response: reqwest::Response,
    ) -> Result<R> {
        let status = response.status();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout {
                    operation: operation.name(),
                    budget,
                }
            } else {
                EngineError::transport(format!("failed to read {} response: {}", operation.name(), e))
            }
        })?;

        if status.is_success() {
            return serde_json::from_str(&text).map_err(|e| {
                EngineError::transport(format!(
                    "failed to parse {} response: {}",
                    operation.name(),
                    e
                ))
            });
        }

        if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(&text) {
            return Err(error_response.into());
        }

        Err(EngineError::transport(format!(
            "{} failed with status {}: {}",
            operation.name(),
            status,
            text
        )))
    }

    fn require(&self, capability: Capability) -> Result<()> {
        if self.capabilities.has(capability) {
            Ok(())
        } else {
            Err(EngineError::Unsupported(capability))
        }
    }
}

/// Accept `host:port` or a full URL
fn parse_base_url(addr: &str) -> Result<Url> {
    let raw = if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    };
    Url::parse(&raw)
        .map_err(|e| EngineError::transport(format!("invalid plugin address {}: {}", addr, e)))
}

#[async_trait]
impl Driver for DriverClient {
    async fn create_options(&self) -> Result<DriverFlags> {
        self.call(Operation::CreateOptions, Some(&Empty {})).await
    }

    async fn update_options(&self) -> Result<DriverFlags> {
        self.call(Operation::UpdateOptions, Some(&Empty {})).await
    }

    async fn create(&self, opts: &DriverOptions) -> Result<ClusterInfo> {
        self.call(Operation::Create, Some(opts)).await
    }

    async fn update(&self, info: &ClusterInfo, opts: &DriverOptions) -> Result<ClusterInfo> {
        let request = UpdateRequest {
            cluster_info: info.clone(),
            driver_options: opts.clone(),
        };
        self.call(Operation::Update, Some(&request)).await
    }

    async fn post_check(&self, info: &ClusterInfo) -> Result<ClusterInfo> {
        self.call(Operation::PostCheck, Some(info)).await
    }

    async fn remove(&self, info: &ClusterInfo) -> Result<()> {
        let _: Empty = self.call(Operation::Remove, Some(info)).await?;
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn get_version(&self, info: &ClusterInfo) -> Result<KubernetesVersion> {
        self.require(Capability::GetVersion)?;
        self.call(Operation::GetVersion, Some(info)).await
    }

    async fn set_version(&self, info: &ClusterInfo, version: &KubernetesVersion) -> Result<()> {
        self.require(Capability::SetVersion)?;
        let request = SetVersionRequest {
            cluster_info: info.clone(),
            version: version.clone(),
        };
        let _: Empty = self.call(Operation::SetVersion, Some(&request)).await?;
        Ok(())
    }

    async fn get_cluster_size(&self, info: &ClusterInfo) -> Result<NodeCount> {
        self.require(Capability::GetClusterSize)?;
        self.call(Operation::GetClusterSize, Some(info)).await
    }

    async fn set_cluster_size(&self, info: &ClusterInfo, size: &NodeCount) -> Result<()> {
        self.require(Capability::SetClusterSize)?;
        let request = SetClusterSizeRequest {
            cluster_info: info.clone(),
            size: *size,
        };
        let _: Empty = self.call(Operation::SetClusterSize, Some(&request)).await?;
        Ok(())
    }
}
