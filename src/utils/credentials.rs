/// Exclusive access to credential environment variables
///
/// Some cloud SDKs only read credentials from the process environment (for
/// example `GOOGLE_APPLICATION_CREDENTIALS`). Drivers hand such values in
/// explicitly and use [`with_ambient_credential`], which holds a process-wide
/// lock across set, use and restore.
use std::ffi::OsString;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;

use tempfile::NamedTempFile;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::Result;

/// Where a credential comes from
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Path to an existing credential file
    Path(PathBuf),
    /// Raw credential content, written to a private temp file while in use
    Content(String),
}

fn ambient_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Holds the environment in its mutated state; restores it on drop
pub struct CredentialGuard {
    var: String,
    previous: Option<OsString>,
    _file: Option<NamedTempFile>,
    _lock: MutexGuard<'static, ()>,
}

impl CredentialGuard {
    /// Wait for exclusive access, then point `var` at `source`
    pub async fn acquire(var: &str, source: &CredentialSource) -> Result<Self> {
        let lock = ambient_lock().lock().await;

        let (value, file) = match source {
            CredentialSource::Path(path) => (path.clone().into_os_string(), None),
            CredentialSource::Content(content) => {
                let mut file = NamedTempFile::new()?;
                file.write_all(content.as_bytes())?;
                file.flush()?;
                (file.path().as_os_str().to_os_string(), Some(file))
            }
        };

        let previous = std::env::var_os(var);
        debug!("Setting credential variable {}", var);
        std::env::set_var(var, &value);

        Ok(Self {
            var: var.to_string(),
            previous,
            _file: file,
            _lock: lock,
        })
    }
}

impl Drop for CredentialGuard {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(previous) => std::env::set_var(&self.var, previous),
            None => std::env::remove_var(&self.var),
        }
        debug!("Restored credential variable {}", self.var);
    }
}

/// Run `f` with `var` set from `source`, restoring the old value afterwards
pub async fn with_ambient_credential<F, Fut, T>(
    var: &str,
    source: &CredentialSource,
    f: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let _guard = CredentialGuard::acquire(var, source).await?;
    f().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[tokio::test]
    async fn test_content_written_and_restored() {
        let var = "OXIDE_ENGINE_TEST_CREDENTIAL_CONTENT";
        std::env::set_var(var, "original");

        let seen = with_ambient_credential(
            var,
            &CredentialSource::Content("{\"type\":\"service_account\"}".to_string()),
            move || async move {
                let path = std::env::var(var).unwrap();
                Ok::<_, EngineError>(std::fs::read_to_string(path)?)
            },
        )
        .await
        .unwrap();

        assert_eq!(seen, "{\"type\":\"service_account\"}");
        assert_eq!(std::env::var(var).unwrap(), "original");
    }

    #[tokio::test]
    async fn test_restored_when_call_fails() {
        let var = "OXIDE_ENGINE_TEST_CREDENTIAL_FAILURE";
        std::env::remove_var(var);

        let result: Result<()> = with_ambient_credential(
            var,
            &CredentialSource::Path(PathBuf::from("/etc/creds.json")),
            move || async move {
                assert_eq!(std::env::var(var).unwrap(), "/etc/creds.json");
                Err(EngineError::driver("permission denied"))
            },
        )
        .await;

        assert!(result.is_err());
        assert!(std::env::var_os(var).is_none());
    }

    #[tokio::test]
    async fn test_temp_file_removed_after_use() {
        let var = "OXIDE_ENGINE_TEST_CREDENTIAL_TEMP";
        let path = with_ambient_credential(
            var,
            &CredentialSource::Content("secret".to_string()),
            move || async move { Ok(PathBuf::from(std::env::var(var).unwrap())) },
        )
        .await
        .unwrap();

        assert!(!path.exists());
    }
}
