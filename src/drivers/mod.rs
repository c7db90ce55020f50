/// Drivers compiled into this binary
pub mod import;

pub use import::ImportDriver;
