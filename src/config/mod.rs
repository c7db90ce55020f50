/// Configuration management for oxide-engine
///
/// Two kinds of files live here: the engine configuration (where state is kept
/// and how plugins are reached) and declarative cluster specs, whose free-form
/// `options` are flattened into the Option Bag a driver understands.
mod flatten;
mod getters;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::rpc::CallTimeouts;

pub use flatten::{flatten_options, MAP_LIST_KEYS};
pub use getters::{CliConfigGetter, SpecConfigGetter};

/// Environment variable overriding `state_dir`
pub const STATE_DIR_ENV: &str = "OXIDE_ENGINE_STATE_DIR";

/// Default engine configuration file
pub const DEFAULT_CONFIG_FILE: &str = "oxide-engine.yaml";

/// Main engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding cluster records
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub plugin: PluginConfig,
}

/// How driver plugins are started and reached
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Address of an externally running plugin, used for drivers that are not built in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_addr: Option<String>,

    /// Run built-in drivers in child processes instead of background tasks
    #[serde(default)]
    pub isolated: bool,

    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Plugin call budgets, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_describe_secs")]
    pub describe_secs: u64,
    #[serde(default = "default_create_secs")]
    pub create_secs: u64,
    #[serde(default = "default_update_secs")]
    pub update_secs: u64,
    #[serde(default = "default_post_check_secs")]
    pub post_check_secs: u64,
    #[serde(default = "default_remove_secs")]
    pub remove_secs: u64,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".oxide-engine")
}

fn default_describe_secs() -> u64 {
    15
}

fn default_create_secs() -> u64 {
    600
}

fn default_update_secs() -> u64 {
    600
}

fn default_post_check_secs() -> u64 {
    30
}

fn default_remove_secs() -> u64 {
    300
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            describe_secs: default_describe_secs(),
            create_secs: default_create_secs(),
            update_secs: default_update_secs(),
            post_check_secs: default_post_check_secs(),
            remove_secs: default_remove_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn to_call_timeouts(self) -> CallTimeouts {
        CallTimeouts {
            describe: Duration::from_secs(self.describe_secs),
            create: Duration::from_secs(self.create_secs),
            update: Duration::from_secs(self.update_secs),
            post_check: Duration::from_secs(self.post_check_secs),
            remove: Duration::from_secs(self.remove_secs),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            plugin: PluginConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise use defaults; then apply env overrides
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = if path.as_ref().exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        if let Ok(dir) = std::env::var(STATE_DIR_ENV) {
            if !dir.is_empty() {
                config.state_dir = PathBuf::from(dir);
            }
        }
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.state_dir.as_os_str().is_empty() {
            return Err(EngineError::validation("state_dir cannot be empty"));
        }

        if let Some(addr) = &self.plugin.listen_addr {
            validate_listen_addr(addr)?;
        }

        let t = &self.plugin.timeouts;
        for (name, secs) in [
            ("describe_secs", t.describe_secs),
            ("create_secs", t.create_secs),
            ("update_secs", t.update_secs),
            ("post_check_secs", t.post_check_secs),
            ("remove_secs", t.remove_secs),
        ] {
            if secs == 0 {
                return Err(EngineError::validation(format!(
                    "plugin.timeouts.{} must be greater than zero",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Generate an example configuration file
    pub fn example() -> Self {
        Self {
            state_dir: default_state_dir(),
            plugin: PluginConfig {
                listen_addr: Some("127.0.0.1:7420".to_string()),
                isolated: false,
                timeouts: TimeoutConfig::default(),
            },
        }
    }
}

/// `host:port`, with a literal IP or a hostname
fn validate_listen_addr(addr: &str) -> Result<()> {
    if addr.parse::<SocketAddr>().is_ok() {
        return Ok(());
    }
    let valid = match addr.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty()
                && !host.contains(['/', ' '])
                && port.parse::<u16>().map(|p| p != 0).unwrap_or(false)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(EngineError::validation(format!(
            "Invalid plugin listen address: {}",
            addr
        )))
    }
}

/// Declarative description of one cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub name: String,
    pub driver: String,

    /// Free-form driver options, flattened into the Option Bag
    #[serde(default)]
    pub options: serde_yaml::Value,
}

impl ClusterSpec {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let spec: ClusterSpec = serde_yaml::from_str(&content)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(EngineError::validation("name cannot be empty"));
        }
        if self.driver.is_empty() {
            return Err(EngineError::validation("driver cannot be empty"));
        }
        match &self.options {
            serde_yaml::Value::Null | serde_yaml::Value::Mapping(_) => Ok(()),
            _ => Err(EngineError::validation("options must be a mapping")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::example();
        assert!(config.validate().is_ok());

        config.plugin.timeouts.post_check_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("post_check_secs"));
    }

    #[test]
    fn test_listen_addr_validation() {
        assert!(validate_listen_addr("127.0.0.1:7420").is_ok());
        assert!(validate_listen_addr("[::1]:7420").is_ok());
        assert!(validate_listen_addr("plugins.internal:7420").is_ok());
        assert!(validate_listen_addr("localhost").is_err());
        assert!(validate_listen_addr("localhost:0").is_err());
        assert!(validate_listen_addr(":7420").is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "plugin:\n  timeouts:\n    post_check_secs: 120").unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.state_dir, PathBuf::from(".oxide-engine"));
        let timeouts = config.plugin.timeouts.to_call_timeouts();
        assert_eq!(timeouts.post_check, Duration::from_secs(120));
        assert_eq!(timeouts.describe, Duration::from_secs(15));
        assert_eq!(timeouts.remove, Duration::from_secs(300));
    }

    #[test]
    fn test_default_timeouts_match_client_defaults() {
        assert_eq!(
            TimeoutConfig::default().to_call_timeouts(),
            CallTimeouts::default()
        );
    }

    #[test]
    fn test_cluster_spec_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "name: demo\ndriver: import\noptions:\n  endpoint: 10.0.0.1:6443\n  node-count: 3"
        )
        .unwrap();

        let spec = ClusterSpec::from_file(file.path()).unwrap();
        assert_eq!(spec.name, "demo");
        assert_eq!(spec.driver, "import");
        assert!(spec.options.is_mapping());
    }

    #[test]
    fn test_cluster_spec_requires_mapping_options() {
        let spec: ClusterSpec =
            serde_yaml::from_str("name: demo\ndriver: import\noptions: [a, b]").unwrap();
        assert!(matches!(spec.validate(), Err(EngineError::Validation(_))));
    }
}
