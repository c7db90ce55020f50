/// Driver-side waiting for remote resources to leave a transient state
use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{EngineError, Result};

/// How long and how often to poll
#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub timeout: Duration,
    pub interval: Duration,
    pub description: String,
}

impl PollingConfig {
    pub fn new(timeout_secs: u64, interval_secs: u64, description: impl Into<String>) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            interval: Duration::from_secs(interval_secs),
            description: description.into(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Poll until `condition` yields a value or the timeout passes
    ///
    /// `Ok(None)` means "not yet"; an `Err` stops polling immediately. The
    /// condition always runs at least once.
    pub async fn poll<F, Fut, T>(&self, condition: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        info!("{}...", self.description);
        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if let Some(value) = condition().await? {
                debug!("{} done after {} attempts", self.description, attempts);
                return Ok(value);
            }

            if start.elapsed() + self.interval > self.timeout {
                return Err(EngineError::driver(format!(
                    "gave up after {}s: {}",
                    self.timeout.as_secs(),
                    self.description
                )));
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// [`PollingConfig::poll`] for plain readiness checks
    pub async fn poll_until<F, Fut>(&self, condition: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        self.poll(|| async { Ok::<_, EngineError>(condition().await?.then_some(())) })
            .await
    }
}
