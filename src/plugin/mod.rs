/// Driver registry and plugin launcher
///
/// Built-in drivers are started on demand behind a [`DriverServer`] bound to an
/// ephemeral loopback port, either on a background task or in a child process.
/// The bound address comes back through a one-shot [`AddressPromise`]. An empty
/// address means the name is not built in and an externally running plugin
/// should be used instead.
pub mod process;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::drivers::ImportDriver;
use crate::error::{EngineError, Result};
use crate::rpc::{CallTimeouts, DriverClient, DriverServer, EPHEMERAL_LISTEN_ADDR};
use crate::types::Driver;

pub use process::PluginProcess;

/// Builds a fresh driver instance
pub type DriverFactory = fn() -> Arc<dyn Driver>;

/// Sending half of the address handoff; consumed by its single use
pub struct AddressPublisher(oneshot::Sender<String>);

impl AddressPublisher {
    pub fn publish(self, addr: String) {
        if self.0.send(addr).is_err() {
            debug!("Address receiver dropped before the plugin address was published");
        }
    }
}

/// Receiving half of the address handoff
pub struct AddressPromise(oneshot::Receiver<String>);

impl AddressPromise {
    /// Resolves to `host:port`, or `""` when the driver is not built in
    pub async fn wait(self) -> Result<String> {
        self.0.await.map_err(|_| {
            EngineError::transport("plugin server exited before publishing its address")
        })
    }
}

pub fn address_channel() -> (AddressPublisher, AddressPromise) {
    let (tx, rx) = oneshot::channel();
    (AddressPublisher(tx), AddressPromise(rx))
}

/// Driver name -> factory
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: BTreeMap<String, DriverFactory>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every driver compiled into this binary
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ImportDriver::NAME, || Arc::new(ImportDriver::new()));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: DriverFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

/// Where built-in drivers run
#[derive(Debug, Clone)]
pub enum LaunchMode {
    /// Background task inside this process
    InProcess,
    /// Child process running `<program> serve-plugin --driver NAME`
    Subprocess { program: PathBuf },
}

/// Aborts an in-process plugin server on drop, closing its listener
struct ServerTask(JoinHandle<()>);

impl Drop for ServerTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A connected driver, plus the server task or child process backing it
pub struct PluginHandle {
    client: DriverClient,
    address: String,
    _server: Option<ServerTask>,
    _process: Option<PluginProcess>,
}

impl PluginHandle {
    pub fn driver(&self) -> Arc<dyn Driver> {
        Arc::new(self.client.clone())
    }

    pub fn client(&self) -> &DriverClient {
        &self.client
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

/// Resolves driver names to ready-to-call clients
#[derive(Clone)]
pub struct Launcher {
    registry: Arc<DriverRegistry>,
    mode: LaunchMode,
    timeouts: CallTimeouts,
    external_addr: Option<String>,
}

impl Launcher {
    pub fn new(registry: DriverRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            mode: LaunchMode::InProcess,
            timeouts: CallTimeouts::default(),
            external_addr: None,
        }
    }

    pub fn with_mode(mut self, mode: LaunchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_timeouts(mut self, timeouts: CallTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Address of an independently running plugin for non built-in drivers
    pub fn with_external_addr(mut self, addr: Option<String>) -> Self {
        self.external_addr = addr.filter(|a| !a.is_empty());
        self
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// Start a built-in driver on a background task that serves until the process exits
    ///
    /// Unknown names are not an error here: the promise resolves to `""`.
    pub fn run(&self, driver_name: &str) -> AddressPromise {
        let (promise, _detached) = self.start(driver_name);
        promise
    }

    fn start(&self, driver_name: &str) -> (AddressPromise, Option<JoinHandle<()>>) {
        let (publisher, promise) = address_channel();

        let task = match self.registry.get(driver_name) {
            Some(driver) => {
                info!("Activating driver {}", driver_name);
                let server = DriverServer::new(driver_name, driver);
                let name = driver_name.to_string();
                Some(tokio::spawn(async move {
                    if let Err(e) = server.serve(EPHEMERAL_LISTEN_ADDR, publisher).await {
                        error!("Driver {} plugin server failed: {}", name, e);
                    }
                }))
            }
            None => {
                debug!("Driver {} is not built in", driver_name);
                publisher.publish(String::new());
                None
            }
        };

        (promise, task)
    }

    /// Start every built-in driver and collect their addresses
    pub async fn activate_all(&self) -> Result<HashMap<String, String>> {
        let names: Vec<String> = self.registry.names().map(str::to_string).collect();
        let promises = names.iter().map(|name| self.run(name).wait());
        let results = join_all(promises).await;

        let mut addresses = HashMap::new();
        for (name, result) in names.into_iter().zip(results) {
            let addr = result?;
            info!("Activating driver {} done ({})", name, addr);
            addresses.insert(name, addr);
        }
        Ok(addresses)
    }

    /// Launch or locate `driver_name` and connect a client to it
    pub async fn connect(&self, driver_name: &str) -> Result<PluginHandle> {
        let (addr, server, process) = match &self.mode {
            LaunchMode::InProcess => {
                let (promise, task) = self.start(driver_name);
                let server = task.map(ServerTask);
                (promise.wait().await?, server, None)
            }
            LaunchMode::Subprocess { program } if self.registry.contains(driver_name) => {
                let (process, addr) = PluginProcess::spawn(program, driver_name).await?;
                (addr, None, Some(process))
            }
            LaunchMode::Subprocess { .. } => (String::new(), None, None),
        };

        let addr = if addr.is_empty() {
            let external = self.external_addr.clone().ok_or_else(|| {
                EngineError::transport(format!(
                    "driver {} is not built in and no plugin address was given",
                    driver_name
                ))
            })?;
            info!("Using external plugin for driver {} at {}", driver_name, external);
            external
        } else {
            addr
        };

        let client = DriverClient::connect(driver_name, &addr, self.timeouts).await?;
        Ok(PluginHandle {
            client,
            address: addr,
            _server: server,
            _process: process,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::types::{Capability, ClusterInfo, DriverOptions};

    #[tokio::test]
    async fn test_unknown_driver_yields_empty_address() {
        let launcher = Launcher::new(DriverRegistry::builtin());
        let addr = launcher.run("gke").wait().await.unwrap();
        assert_eq!(addr, "");
    }

    #[tokio::test]
    async fn test_builtin_driver_publishes_loopback_address() {
        let launcher = Launcher::new(DriverRegistry::builtin());
        let addr = launcher.run(ImportDriver::NAME).wait().await.unwrap();
        assert!(addr.starts_with("127.0.0.1:"));
        assert!(!addr.ends_with(":0"));
    }

    #[tokio::test]
    async fn test_dropped_publisher_fails_the_promise() {
        let (publisher, promise) = address_channel();
        drop(publisher);
        assert!(matches!(promise.wait().await, Err(EngineError::Transport(_))));
    }

    #[tokio::test]
    async fn test_unknown_driver_without_external_addr_fails() {
        let launcher = Launcher::new(DriverRegistry::builtin());
        let result = launcher.connect("amazonelasticcontainerservice").await;
        assert!(matches!(result, Err(EngineError::Transport(_))));
    }

    #[tokio::test]
    async fn test_unknown_driver_falls_back_to_external_plugin() {
        // A plugin started elsewhere, serving under its own name
        let external = Launcher::new(DriverRegistry::builtin());
        let addr = external.run(ImportDriver::NAME).wait().await.unwrap();

        let mut registry = DriverRegistry::new();
        registry.register("other", || Arc::new(ImportDriver::new()));
        let launcher = Launcher::new(registry).with_external_addr(Some(addr.clone()));

        let handle = launcher.connect(ImportDriver::NAME).await.unwrap();
        assert_eq!(handle.address(), addr);
    }

    #[tokio::test]
    async fn test_dropped_handle_stops_in_process_server() {
        let launcher = Launcher::new(DriverRegistry::builtin());

        let mut addresses = Vec::new();
        for _ in 0..3 {
            let handle = launcher.connect(ImportDriver::NAME).await.unwrap();
            addresses.push(handle.address().to_string());
        }

        for addr in addresses {
            let mut closed = false;
            for _ in 0..50 {
                if tokio::net::TcpStream::connect(&addr).await.is_err() {
                    closed = true;
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            assert!(closed, "{} still accepts connections", addr);
        }
    }

    #[tokio::test]
    async fn test_activate_all_starts_every_builtin() {
        let launcher = Launcher::new(DriverRegistry::builtin());
        let addresses = launcher.activate_all().await.unwrap();
        assert_eq!(addresses.len(), 1);
        assert!(addresses[ImportDriver::NAME].starts_with("127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_calls_cross_the_plugin_boundary() {
        let launcher = Launcher::new(DriverRegistry::builtin());
        let handle = launcher.connect(ImportDriver::NAME).await.unwrap();
        let driver = handle.driver();

        let flags = driver.create_options().await.unwrap();
        assert!(flags.get("endpoint").is_some());
        assert!(driver.capabilities().has(Capability::GetVersion));

        let opts = DriverOptions::new()
            .with_string("name", "demo")
            .with_string("endpoint", "10.0.0.1:6443")
            .with_string("kubernetes-version", "v1.30.0");
        let info = driver.create(&opts).await.unwrap();
        assert_eq!(info.endpoint, "https://10.0.0.1:6443");

        let version = driver.get_version(&info).await.unwrap();
        assert_eq!(version.version, "v1.30.0");
    }

    #[tokio::test]
    async fn test_driver_errors_keep_their_kind_over_the_wire() {
        let launcher = Launcher::new(DriverRegistry::builtin());
        let handle = launcher.connect(ImportDriver::NAME).await.unwrap();
        let driver = handle.driver();

        let err = driver
            .create(&DriverOptions::new().with_string("name", "demo"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = driver.post_check(&ClusterInfo::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
