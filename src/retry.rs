use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{HuntError, ProviderError};

/// Errors that know whether another attempt could help.
pub trait Transient {
    fn is_transient(&self) -> bool;
    fn timed_out(after_secs: u64) -> Self;
}

impl Transient for ProviderError {
    fn is_transient(&self) -> bool {
        ProviderError::is_transient(self)
    }

    fn timed_out(after_secs: u64) -> Self {
        ProviderError::Timeout(after_secs)
    }
}

impl Transient for HuntError {
    fn is_transient(&self) -> bool {
        match self {
            HuntError::Mail(_) | HuntError::Io(_) => true,
            HuntError::Provider(e) => e.is_transient(),
            _ => false,
        }
    }

    fn timed_out(after_secs: u64) -> Self {
        HuntError::Mail(format!("timed out after {}s", after_secs))
    }
}

/// Per-attempt timeout plus bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        E: Transient + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(E::timed_out(self.timeout.as_secs())),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let jitter_ms = if self.base_delay.is_zero() {
                        0
                    } else {
                        rand::thread_rng().gen_range(0..=self.base_delay.as_millis() as u64 / 2)
                    };
                    let delay = self.backoff(attempt) + Duration::from_millis(jitter_ms);
                    warn!(operation, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(operation, attempt, error = %e, "giving up");
                    return Err(e);
                }
            }
        }
    }
}
