/// Driver contract and the data that crosses it
pub mod capabilities;
pub mod driver;
pub mod flags;
pub mod info;
pub mod options;

pub use capabilities::{Capabilities, Capability};
pub use driver::Driver;
pub use flags::{DriverFlags, Flag, OptionType};
pub use info::{ClusterInfo, KubernetesVersion, NodeCount};
pub use options::{DriverOptions, OptionValue, StringSlice};
