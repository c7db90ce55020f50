/// Wire messages for the driver plugin protocol
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, ErrorKind};
use crate::types::{Capabilities, ClusterInfo, DriverOptions, KubernetesVersion, NodeCount};

/// Bumped whenever a route or message shape changes incompatibly
pub const PROTOCOL_VERSION: u32 = 1;

/// Handshake payload served at `GET /v1/plugin`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub driver_name: String,
    pub protocol_version: u32,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub cluster_info: ClusterInfo,
    pub driver_options: DriverOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetVersionRequest {
    pub cluster_info: ClusterInfo,
    pub version: KubernetesVersion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetClusterSizeRequest {
    pub cluster_info: ClusterInfo,
    pub size: NodeCount,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}

/// Error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&EngineError> for ErrorResponse {
    fn from(err: &EngineError) -> Self {
        Self {
            error: ErrorDetails {
                kind: err.kind(),
                message: err.message(),
            },
        }
    }
}

impl From<ErrorResponse> for EngineError {
    fn from(resp: ErrorResponse) -> Self {
        EngineError::from_wire(resp.error.kind, resp.error.message)
    }
}

/// Remote-callable operations, with their routes and timeout budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Handshake,
    CreateOptions,
    UpdateOptions,
    Create,
    Update,
    PostCheck,
    Remove,
    GetVersion,
    SetVersion,
    GetClusterSize,
    SetClusterSize,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::Handshake => "handshake",
            Operation::CreateOptions => "create-options",
            Operation::UpdateOptions => "update-options",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::PostCheck => "post-check",
            Operation::Remove => "remove",
            Operation::GetVersion => "version",
            Operation::SetVersion => "set-version",
            Operation::GetClusterSize => "cluster-size",
            Operation::SetClusterSize => "set-cluster-size",
        }
    }

    pub fn path(self) -> String {
        match self {
            Operation::Handshake => "/v1/plugin".to_string(),
            other => format!("/v1/driver/{}", other.name()),
        }
    }

    /// Caller-side budget for this call
    pub fn budget(self, timeouts: &CallTimeouts) -> Duration {
        match self {
            Operation::Handshake
            | Operation::CreateOptions
            | Operation::UpdateOptions
            | Operation::GetVersion
            | Operation::GetClusterSize => timeouts.describe,
            Operation::Create | Operation::SetVersion | Operation::SetClusterSize => {
                timeouts.create
            }
            Operation::Update => timeouts.update,
            Operation::PostCheck => timeouts.post_check,
            Operation::Remove => timeouts.remove,
        }
    }
}

/// Per-call budgets used by the plugin client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    pub describe: Duration,
    pub create: Duration,
    pub update: Duration,
    pub post_check: Duration,
    pub remove: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            describe: Duration::from_secs(15),
            create: Duration::from_secs(10 * 60),
            update: Duration::from_secs(10 * 60),
            post_check: Duration::from_secs(30),
            remove: Duration::from_secs(5 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budgets() {
        let timeouts = CallTimeouts::default();
        assert_eq!(Operation::CreateOptions.budget(&timeouts), Duration::from_secs(15));
        assert_eq!(Operation::Create.budget(&timeouts), Duration::from_secs(600));
        assert_eq!(Operation::Update.budget(&timeouts), Duration::from_secs(600));
        assert_eq!(Operation::PostCheck.budget(&timeouts), Duration::from_secs(30));
        assert_eq!(Operation::Remove.budget(&timeouts), Duration::from_secs(300));
    }

    #[test]
    fn test_routes() {
        assert_eq!(Operation::Handshake.path(), "/v1/plugin");
        assert_eq!(Operation::PostCheck.path(), "/v1/driver/post-check");
        assert_eq!(Operation::SetClusterSize.path(), "/v1/driver/set-cluster-size");
    }

    #[test]
    fn test_error_response_shape() {
        let resp = ErrorResponse::from(&EngineError::validation("zone is required"));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"]["kind"], "validation");
        assert_eq!(json["error"]["message"], "zone is required");
    }
}
