pub mod credentials;
pub mod polling;

pub use credentials::{with_ambient_credential, CredentialGuard, CredentialSource};
pub use polling::PollingConfig;
