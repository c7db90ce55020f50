/// Driver plugin transport
pub mod client;
pub mod messages;
pub mod server;

pub use client::DriverClient;
pub use messages::{CallTimeouts, Operation, PluginInfo, PROTOCOL_VERSION};
pub use server::{DriverServer, EPHEMERAL_LISTEN_ADDR};
