/// Driver that registers an already-running cluster
///
/// Nothing is provisioned: `create` records the endpoint and credentials it is
/// given, `post_check` optionally waits for the API server to answer, and
/// `remove` only forgets the cluster.
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Certificate, Client};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::types::info::{STATE_KEY, STATE_VERSION_KEY};
use crate::types::{
    Capabilities, Capability, ClusterInfo, Driver, DriverFlags, DriverOptions, Flag,
    KubernetesVersion, NodeCount, OptionValue,
};
use crate::utils::PollingConfig;

const STATE_VERSION: u32 = 1;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_INTERVAL: Duration = Duration::from_secs(2);

const ENDPOINT: &str = "endpoint";
const ROOT_CA_CERT: &str = "root-ca-cert";
const CLIENT_CERTIFICATE: &str = "client-certificate";
const CLIENT_KEY: &str = "client-key";
const SERVICE_ACCOUNT_TOKEN: &str = "service-account-token";
const USERNAME: &str = "username";
const PASSWORD: &str = "password";
const KUBERNETES_VERSION: &str = "kubernetes-version";
const NODE_COUNT: &str = "node-count";
const WAIT_READY_SECS: &str = "wait-ready-secs";

/// Keys update accepts besides its flags; the metadata merge injects the state slots
const UPDATE_RESERVED: [&str; 3] = ["name", STATE_KEY, STATE_VERSION_KEY];

/// Driver-private state kept in cluster metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ImportState {
    name: String,
    wait_ready_secs: u64,
}

/// Response of the API server's `/version` endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionInfo {
    git_version: String,
}

#[derive(Debug, Default)]
pub struct ImportDriver {
    probe_interval: Option<Duration>,
}

impl ImportDriver {
    pub const NAME: &'static str = "import";

    pub fn new() -> Self {
        Self::default()
    }

    fn credential_flags() -> DriverFlags {
        DriverFlags::new()
            .with(ROOT_CA_CERT, Flag::string("Base64 encoded cluster CA certificate"))
            .with(
                CLIENT_CERTIFICATE,
                Flag::string("Base64 encoded client certificate"),
            )
            .with(CLIENT_KEY, Flag::string("Base64 encoded client key"))
            .with(
                SERVICE_ACCOUNT_TOKEN,
                Flag::string("Bearer token used to reach the API server"),
            )
            .with(USERNAME, Flag::string("Username for HTTP basic auth"))
            .with(PASSWORD, Flag::string("Password for HTTP basic auth"))
            .with(
                KUBERNETES_VERSION,
                Flag::string("Kubernetes version running on the cluster"),
            )
            .with(NODE_COUNT, Flag::int("Number of nodes in the cluster"))
    }

    fn create_flags() -> DriverFlags {
        Self::credential_flags()
            .with(
                ENDPOINT,
                Flag::string("Kubernetes API endpoint, host:port or URL (required)"),
            )
            .with(
                WAIT_READY_SECS,
                Flag::int(
                    "Seconds to wait for the API server during post-check, 0 to skip. \
                     Must stay below the engine's post-check budget \
                     (plugin.timeouts.post_check_secs, 30 by default)",
                )
                .with_default(OptionValue::Int(0)),
            )
    }

    fn probe_config(&self, endpoint: &str, wait_secs: u64) -> PollingConfig {
        PollingConfig::new(wait_secs, 0, format!("Waiting for API server at {}", endpoint))
            .with_interval(self.probe_interval.unwrap_or(PROBE_INTERVAL))
    }

    /// Poll `<endpoint>/version` until it answers, returning the reported version
    async fn wait_ready(&self, info: &ClusterInfo, wait_secs: u64) -> Result<String> {
        let client = probe_client(info)?;
        let url = format!("{}/version", info.endpoint.trim_end_matches('/'));

        self.probe_config(&info.endpoint, wait_secs)
            .poll(|| {
                let mut request = client.get(&url);
                if !info.service_account_token.is_empty() {
                    request = request.bearer_auth(&info.service_account_token);
                } else if !info.username.is_empty() {
                    request = request.basic_auth(&info.username, Some(&info.password));
                }
                async move {
                    match request.send().await {
                        Ok(response) if response.status().is_success() => {
                            let version: VersionInfo = response.json().await.map_err(|e| {
                                EngineError::driver(format!("unexpected /version response: {}", e))
                            })?;
                            Ok::<_, EngineError>(Some(version.git_version))
                        }
                        Ok(response) => {
                            debug!("API server answered {}", response.status());
                            Ok(None)
                        }
                        Err(e) => {
                            debug!("API server not reachable yet: {}", e);
                            Ok(None)
                        }
                    }
                }
            })
            .await
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.starts_with("https://") || endpoint.starts_with("http://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    }
}

/// Credentials must be base64 so they survive storage unchanged
fn check_base64(key: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    STANDARD
        .decode(value)
        .map(|_| ())
        .map_err(|e| EngineError::validation(format!("{} is not valid base64: {}", key, e)))
}

fn probe_client(info: &ClusterInfo) -> Result<Client> {
    let mut builder = Client::builder().timeout(PROBE_TIMEOUT);
    if !info.root_ca_certificate.is_empty() {
        let pem = STANDARD
            .decode(&info.root_ca_certificate)
            .map_err(|e| EngineError::validation(format!("invalid root CA: {}", e)))?;
        let cert = Certificate::from_pem(&pem)
            .map_err(|e| EngineError::validation(format!("invalid root CA: {}", e)))?;
        builder = builder.add_root_certificate(cert);
    }
    builder
        .build()
        .map_err(|e| EngineError::driver(format!("failed to create HTTP client: {}", e)))
}

/// Overwrite `target` with the option under `key` if the caller set it
fn apply_string(opts: &DriverOptions, key: &str, target: &mut String) -> Result<()> {
    if let Some(value) = opts.string_options.get(key) {
        if matches!(key, ROOT_CA_CERT | CLIENT_CERTIFICATE | CLIENT_KEY) {
            check_base64(key, value)?;
        }
        *target = value.clone();
    }
    Ok(())
}

fn apply_credentials(opts: &DriverOptions, info: &mut ClusterInfo) -> Result<()> {
    apply_string(opts, ROOT_CA_CERT, &mut info.root_ca_certificate)?;
    apply_string(opts, CLIENT_CERTIFICATE, &mut info.client_certificate)?;
    apply_string(opts, CLIENT_KEY, &mut info.client_key)?;
    apply_string(opts, SERVICE_ACCOUNT_TOKEN, &mut info.service_account_token)?;
    apply_string(opts, USERNAME, &mut info.username)?;
    apply_string(opts, PASSWORD, &mut info.password)?;
    apply_string(opts, KUBERNETES_VERSION, &mut info.version)?;
    if let Some(count) = opts.int_options.get(NODE_COUNT) {
        if *count < 0 {
            return Err(EngineError::validation("node-count cannot be negative"));
        }
        info.node_count = *count;
    }
    Ok(())
}

#[async_trait]
impl Driver for ImportDriver {
    async fn create_options(&self) -> Result<DriverFlags> {
        Ok(Self::create_flags())
    }

    async fn update_options(&self) -> Result<DriverFlags> {
        Ok(Self::credential_flags())
    }

    async fn create(&self, opts: &DriverOptions) -> Result<ClusterInfo> {
        let flags = Self::create_flags();
        flags.validate(opts, &["name"])?;

        let endpoint = opts.get_string(&[ENDPOINT]);
        if endpoint.trim().is_empty() {
            return Err(EngineError::validation("endpoint is required"));
        }
        let wait_ready_secs = opts.get_int(&[WAIT_READY_SECS]);
        if wait_ready_secs < 0 {
            return Err(EngineError::validation("wait-ready-secs cannot be negative"));
        }

        let mut info = ClusterInfo {
            endpoint: normalize_endpoint(&endpoint),
            ..Default::default()
        };
        apply_credentials(opts, &mut info)?;

        let state = ImportState {
            name: opts.get_string(&["name"]),
            wait_ready_secs: wait_ready_secs as u64,
        };
        info.store_state(STATE_VERSION, &state)?;

        info!("Imported cluster {} at {}", state.name, info.endpoint);
        Ok(info)
    }

    async fn update(&self, info: &ClusterInfo, opts: &DriverOptions) -> Result<ClusterInfo> {
        Self::credential_flags().validate(opts, &UPDATE_RESERVED)?;

        let state: ImportState = info.load_state(STATE_VERSION)?;
        let mut info = info.clone();
        apply_credentials(opts, &mut info)?;
        info.store_state(STATE_VERSION, &state)?;

        debug!("Updated imported cluster {}", state.name);
        Ok(info)
    }

    async fn post_check(&self, info: &ClusterInfo) -> Result<ClusterInfo> {
        let state: ImportState = info.load_state(STATE_VERSION)?;
        if info.endpoint.is_empty() {
            return Err(EngineError::validation("cluster info has no endpoint"));
        }

        let mut info = info.clone();
        if state.wait_ready_secs > 0 {
            let version = self.wait_ready(&info, state.wait_ready_secs).await?;
            info!("API server of {} is up ({})", state.name, version);
            info.version = version;
        }
        Ok(info)
    }

    async fn remove(&self, info: &ClusterInfo) -> Result<()> {
        debug!("Forgetting imported cluster at {}", info.endpoint);
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new()
            .with(Capability::GetVersion)
            .with(Capability::GetClusterSize)
    }

    async fn get_version(&self, info: &ClusterInfo) -> Result<KubernetesVersion> {
        Ok(KubernetesVersion {
            version: info.version.clone(),
        })
    }

    async fn get_cluster_size(&self, info: &ClusterInfo) -> Result<NodeCount> {
        Ok(NodeCount {
            count: info.node_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Json, Router};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_driver() -> ImportDriver {
        ImportDriver {
            probe_interval: Some(Duration::from_millis(20)),
        }
    }

    fn create_opts(endpoint: &str) -> DriverOptions {
        DriverOptions::new()
            .with_string("name", "demo")
            .with_string(ENDPOINT, endpoint)
            .with_string(ROOT_CA_CERT, STANDARD.encode("ca"))
            .with_string(SERVICE_ACCOUNT_TOKEN, "token")
            .with_int(NODE_COUNT, 3)
    }

    /// API server stand-in that fails `failures` times before answering
    async fn api_server(failures: u32) -> String {
        let calls = Arc::new(AtomicU32::new(0));
        let app = Router::new().route(
            "/version",
            get(move || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < failures {
                        Err(StatusCode::SERVICE_UNAVAILABLE)
                    } else {
                        Ok(Json(serde_json::json!({"gitVersion": "v1.30.2", "major": "1"})))
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_create_records_connection_details() {
        let info = ImportDriver::new()
            .create(&create_opts("10.0.0.1:6443"))
            .await
            .unwrap();

        assert_eq!(info.endpoint, "https://10.0.0.1:6443");
        assert_eq!(info.service_account_token, "token");
        assert_eq!(info.node_count, 3);
        let state: ImportState = info.load_state(STATE_VERSION).unwrap();
        assert_eq!(state.name, "demo");
        assert_eq!(state.wait_ready_secs, 0);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let driver = ImportDriver::new();

        let missing = DriverOptions::new().with_string("name", "demo");
        assert!(matches!(
            driver.create(&missing).await,
            Err(EngineError::Validation(_))
        ));

        let bad_cert = create_opts("10.0.0.1").with_string(CLIENT_KEY, "not base64!");
        let err = driver.create(&bad_cert).await.unwrap_err();
        assert!(err.to_string().contains("client-key"));

        let unknown = create_opts("10.0.0.1").with_string("region", "eu");
        assert!(matches!(
            driver.create(&unknown).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_update_changes_only_supplied_fields() {
        let driver = ImportDriver::new();
        let info = driver.create(&create_opts("10.0.0.1")).await.unwrap();

        // Persisted metadata is merged into update options by the orchestrator
        let mut opts = DriverOptions::new()
            .with_string("name", "demo")
            .with_string(SERVICE_ACCOUNT_TOKEN, "rotated");
        opts.merge_missing_strings(&info.metadata);

        let updated = driver.update(&info, &opts).await.unwrap();
        assert_eq!(updated.service_account_token, "rotated");
        assert_eq!(updated.endpoint, "https://10.0.0.1");
        assert_eq!(updated.node_count, 3);
        assert_eq!(updated.metadata, info.metadata);
    }

    #[tokio::test]
    async fn test_update_rejects_create_only_and_unknown_options() {
        let driver = ImportDriver::new();
        let info = driver.create(&create_opts("10.0.0.1")).await.unwrap();

        for (key, value) in [(ENDPOINT, "10.9.9.9:6443"), ("bogus-key", "x")] {
            let mut opts = DriverOptions::new()
                .with_string("name", "demo")
                .with_string(key, value);
            opts.merge_missing_strings(&info.metadata);

            let err = driver.update(&info, &opts).await.unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)), "{}", key);
        }

        let moved = DriverOptions::new().with_int(WAIT_READY_SECS, 10);
        assert!(matches!(
            driver.update(&info, &moved).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_post_check_without_wait_skips_probe() {
        let driver = ImportDriver::new();
        // Nothing listens here; the probe must not run
        let info = driver.create(&create_opts("127.0.0.1:1")).await.unwrap();
        let checked = driver.post_check(&info).await.unwrap();
        assert_eq!(checked, info);
    }

    #[tokio::test]
    async fn test_post_check_waits_for_api_server() {
        let endpoint = api_server(2).await;
        let driver = fast_driver();
        let opts = DriverOptions::new()
            .with_string("name", "demo")
            .with_string(ENDPOINT, &endpoint)
            .with_int(WAIT_READY_SECS, 5);

        let info = driver.create(&opts).await.unwrap();
        assert_eq!(info.endpoint, endpoint);

        let checked = driver.post_check(&info).await.unwrap();
        assert_eq!(checked.version, "v1.30.2");
    }

    #[tokio::test]
    async fn test_post_check_gives_up_on_dead_endpoint() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let driver = fast_driver();
        let opts = DriverOptions::new()
            .with_string("name", "demo")
            .with_string(ENDPOINT, &endpoint)
            .with_int(WAIT_READY_SECS, 1);
        let info = driver.create(&opts).await.unwrap();

        let err = driver.post_check(&info).await.unwrap_err();
        assert!(matches!(err, EngineError::Driver(_)));
    }

    #[tokio::test]
    async fn test_optional_operations() {
        let driver = ImportDriver::new();
        let info = driver
            .create(&create_opts("10.0.0.1").with_string(KUBERNETES_VERSION, "v1.29.4"))
            .await
            .unwrap();

        assert_eq!(driver.get_version(&info).await.unwrap().version, "v1.29.4");
        assert_eq!(driver.get_cluster_size(&info).await.unwrap().count, 3);
        assert!(matches!(
            driver.set_cluster_size(&info, &NodeCount { count: 5 }).await,
            Err(EngineError::Unsupported(Capability::SetClusterSize))
        ));
        assert!(!driver.capabilities().has(Capability::SetVersion));
    }

    #[tokio::test]
    async fn test_remove_never_fails() {
        let driver = ImportDriver::new();
        assert!(driver.remove(&ClusterInfo::default()).await.is_ok());
    }

    #[test]
    fn test_update_flags_omit_immutable_options() {
        let flags = ImportDriver::credential_flags();
        assert!(flags.get(ENDPOINT).is_none());
        assert!(flags.get(WAIT_READY_SECS).is_none());
        assert!(ImportDriver::create_flags().get(ENDPOINT).is_some());
    }

    #[test]
    fn test_wait_ready_usage_names_the_post_check_budget() {
        let flags = ImportDriver::create_flags();
        let usage = &flags.get(WAIT_READY_SECS).unwrap().usage;
        assert!(usage.contains("plugin.timeouts.post_check_secs"));
    }
}
