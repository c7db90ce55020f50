/// Cluster connection snapshot returned by drivers
use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Metadata slot holding the driver's serialized internal state
pub const STATE_KEY: &str = "state";
/// Metadata slot holding the schema version of [`STATE_KEY`]
pub const STATE_VERSION_KEY: &str = "state-version";

/// Connection, credential and state data a driver hands back
///
/// Drivers may be re-created for every call, so anything they need later must
/// round-trip through `metadata`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub service_account_token: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub root_ca_certificate: String,
    #[serde(default)]
    pub client_certificate: String,
    #[serde(default)]
    pub client_key: String,
    #[serde(default)]
    pub node_count: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ClusterInfo {
    /// Serialize driver state into the metadata slot, tagged with its schema version
    pub fn store_state<T: Serialize>(&mut self, version: u32, state: &T) -> Result<()> {
        let data = serde_json::to_string(state)?;
        self.metadata.insert(STATE_KEY.to_string(), data);
        self.metadata
            .insert(STATE_VERSION_KEY.to_string(), version.to_string());
        Ok(())
    }

    /// Load driver state written by [`ClusterInfo::store_state`]
    ///
    /// Fails if the slot is missing or was written with another schema version.
    pub fn load_state<T: DeserializeOwned>(&self, version: u32) -> Result<T> {
        let data = self
            .metadata
            .get(STATE_KEY)
            .ok_or_else(|| EngineError::validation("cluster info has no driver state"))?;

        let stored = self
            .metadata
            .get(STATE_VERSION_KEY)
            .map(String::as_str)
            .unwrap_or("0");
        if stored != version.to_string() {
            return Err(EngineError::validation(format!(
                "driver state version {} does not match expected {}",
                stored, version
            )));
        }

        serde_json::from_str(data).map_err(|e| {
            EngineError::validation(format!("failed to decode driver state: {}", e))
        })
    }
}

/// Kubernetes version reported or requested through the optional version ops
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubernetesVersion {
    pub version: String,
}

/// Node count reported or requested through the optional size ops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCount {
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct SampleState {
        project_id: String,
        zone: String,
    }

    #[test]
    fn test_state_round_trip() {
        let state = SampleState {
            project_id: "p1".to_string(),
            zone: "z1".to_string(),
        };
        let mut info = ClusterInfo::default();
        info.store_state(2, &state).unwrap();

        assert_eq!(info.metadata[STATE_VERSION_KEY], "2");
        let loaded: SampleState = info.load_state(2).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_stale_state_version_rejected() {
        let mut info = ClusterInfo::default();
        info.store_state(1, &serde_json::json!({"zone": "z1"})).unwrap();

        let err = info.load_state::<serde_json::Value>(2).unwrap_err();
        assert!(err.to_string().contains("version 1 does not match expected 2"));
    }

    #[test]
    fn test_missing_state_rejected() {
        let info = ClusterInfo::default();
        assert!(info.load_state::<serde_json::Value>(1).is_err());
    }

    #[test]
    fn test_camel_case_wire_names() {
        let info = ClusterInfo {
            root_ca_certificate: "Y2E=".to_string(),
            node_count: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["rootCaCertificate"], "Y2E=");
        assert_eq!(json["nodeCount"], 3);
    }
}
