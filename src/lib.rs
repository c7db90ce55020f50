/// oxide-engine - pluggable Kubernetes cluster provisioning
///
/// Drivers implement one contract ([`types::Driver`]) and are reached through
/// a small HTTP/JSON plugin protocol, whether they run on a background task, in
/// a child process or somewhere else entirely. The [`cluster::Orchestrator`]
/// drives each cluster through a persisted lifecycle so interrupted runs can
/// be resumed.
pub mod cluster;
pub mod config;
pub mod drivers;
pub mod error;
pub mod plugin;
pub mod rpc;
pub mod store;
pub mod types;
pub mod utils;

pub use error::{EngineError, Result};
