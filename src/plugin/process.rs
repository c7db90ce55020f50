/// Driver plugins running as child processes
use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::error::{EngineError, Result};

/// How long a child gets to print its bound address
const ADDRESS_WAIT: Duration = Duration::from_secs(30);

/// Subcommand a plugin binary serves drivers with
pub const SERVE_SUBCOMMAND: &str = "serve-plugin";

/// A running plugin child; killed when dropped
pub struct PluginProcess {
    child: Child,
    driver_name: String,
}

impl PluginProcess {
    /// Run `<program> serve-plugin --driver NAME` and read the address it prints
    ///
    /// The first stdout line is the bound address, or an empty line when the
    /// child does not know the driver.
    pub async fn spawn<S: AsRef<OsStr>>(program: S, driver_name: &str) -> Result<(Self, String)> {
        Self::spawn_with_args(program, &[SERVE_SUBCOMMAND, "--driver", driver_name], driver_name)
            .await
    }

    pub(crate) async fn spawn_with_args<S: AsRef<OsStr>>(
        program: S,
        args: &[&str],
        driver_name: &str,
    ) -> Result<(Self, String)> {
        let mut command = Command::new(program.as_ref());
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            EngineError::transport(format!(
                "failed to start plugin process for {}: {}",
                driver_name, e
            ))
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::transport("plugin process has no stdout"))?;

        let mut lines = BufReader::new(stdout).lines();
        let line = tokio::time::timeout(ADDRESS_WAIT, lines.next_line())
            .await
            .map_err(|_| {
                EngineError::Timeout {
                    operation: "plugin address",
                    budget: ADDRESS_WAIT,
                }
            })??
            .ok_or_else(|| {
                EngineError::transport(format!(
                    "plugin process for {} exited before printing its address",
                    driver_name
                ))
            })?;

        let addr = line.trim().to_string();
        if addr.is_empty() {
            debug!("Plugin process does not provide driver {}", driver_name);
        } else {
            info!(
                "Driver {} running in process {} at {}",
                driver_name,
                child.id().unwrap_or_default(),
                addr
            );
        }

        Ok((
            Self {
                child,
                driver_name: driver_name.to_string(),
            },
            addr,
        ))
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Stop the child and wait for it to exit
    pub async fn shutdown(mut self) -> Result<()> {
        debug!("Stopping plugin process for {}", self.driver_name);
        self.child.kill().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_first_line_as_address() {
        // Stand-in plugin: prints an address and stays alive
        let result = PluginProcess::spawn_with_args(
            "sh",
            &["-c", "echo 127.0.0.1:40123; sleep 5"],
            "import",
        )
        .await;

        let (process, addr) = result.unwrap();
        assert_eq!(addr, "127.0.0.1:40123");
        assert!(process.id().is_some());
        process.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_exit_is_transport_error() {
        let result = PluginProcess::spawn_with_args("sh", &["-c", "exit 0"], "import").await;
        assert!(matches!(result, Err(EngineError::Transport(_))));
    }

    #[tokio::test]
    async fn test_missing_program_is_transport_error() {
        let result = PluginProcess::spawn("/nonexistent/oxide-engine", "import").await;
        assert!(matches!(result, Err(EngineError::Transport(_))));
    }
}
