//! Error types for the cluster engine

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::Status;
use crate::types::Capability;

/// Result alias used across the engine
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Main error type for engine operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Missing or invalid option, detected before any remote call
    #[error("validation error: {0}")]
    Validation(String),

    /// Dial failure or broken connection to a driver plugin
    #[error("transport error: {0}")]
    Transport(String),

    /// A plugin call exceeded its budget
    #[error("{operation} timed out after {}s", budget.as_secs())]
    Timeout {
        operation: &'static str,
        budget: Duration,
    },

    /// Failure reported by a driver
    #[error("driver error: {0}")]
    Driver(String),

    /// Operation requested against a cluster in an incompatible status
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// Remote resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Driver does not implement an optional operation
    #[error("driver does not support {0}")]
    Unsupported(Capability),

    /// No persisted record exists for the cluster
    #[error("cluster {0} can't be found")]
    UnknownCluster(String),

    /// Persistence port failure
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The Error status itself could not be written; stored truth may now disagree with reality
    #[error("failed to persist {status} status for cluster {cluster} ({cause}) after: {original}")]
    StatusWriteFailed {
        cluster: String,
        status: Status,
        cause: String,
        original: Box<EngineError>,
    },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable error category carried over the plugin wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Transport,
    Timeout,
    Driver,
    StateConflict,
    NotFound,
    Unsupported,
    Persistence,
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn driver(msg: impl Into<String>) -> Self {
        Self::Driver(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn state_conflict(msg: impl Into<String>) -> Self {
        Self::StateConflict(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// True for "resource already gone" failures that removal treats as success
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Wire category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::StateConflict(_) | Self::UnknownCluster(_) => ErrorKind::StateConflict,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Persistence(_) | Self::StatusWriteFailed { .. } | Self::Io(_) => {
                ErrorKind::Persistence
            }
            Self::Driver(_) | Self::Json(_) | Self::Yaml(_) => ErrorKind::Driver,
        }
    }

    /// Message without the category prefix, as sent over the wire
    pub fn message(&self) -> String {
        match self {
            Self::Validation(m)
            | Self::Transport(m)
            | Self::Driver(m)
            | Self::StateConflict(m)
            | Self::NotFound(m)
            | Self::Persistence(m) => m.clone(),
            other => other.to_string(),
        }
    }

    /// Rebuild an error received from a remote plugin
    pub fn from_wire(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::Validation => Self::Validation(message),
            ErrorKind::Transport | ErrorKind::Timeout => Self::Transport(message),
            ErrorKind::StateConflict => Self::StateConflict(message),
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::Persistence => Self::Persistence(message),
            ErrorKind::Unsupported | ErrorKind::Driver => Self::Driver(message),
        }
    }
}
