//! Retry controller.
//!
//! Retries an operation while it fails with a retryable error (timeouts and
//! transient storage failures), sleeping a linearly growing, randomized
//! backoff between attempts. Anything else is returned immediately.
//! Cancellation is honored before each attempt and during the backoff; an
//! attempt already running is left to finish.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::utils::jitter::{Pacing, SecondsRange};

/// Attempts and backoff for one unit of work.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    /// Backoff bounds for attempt 1; attempt `n` waits `n` times these
    backoff_step: SecondsRange,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_step: SecondsRange) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_step,
        }
    }

    pub fn from_pacing(max_attempts: u32, pacing: &Pacing) -> Self {
        Self::new(max_attempts, pacing.backoff_step)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff bounds after a failed `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> SecondsRange {
        self.backoff_step.scaled(f64::from(attempt))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. Returns `Ok(None)` when
    /// `token` is cancelled before the next attempt starts.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        token: &CancellationToken,
        mut op: F,
    ) -> Result<Option<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            if token.is_cancelled() {
                log::info!("{label}: cancelled before attempt {attempt}");
                return Ok(None);
            }
            match op(attempt).await {
                Ok(value) => return Ok(Some(value)),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let wait = self.backoff_for(attempt).sample();
                    log::warn!(
                        "{label}: attempt {attempt}/{} failed: {e}; retrying in {:.1}s",
                        self.max_attempts,
                        wait.as_secs_f64()
                    );
                    tokio::select! {
                        _ = token.cancelled() => {
                            log::info!("{label}: cancelled during backoff");
                            return Ok(None);
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        log::error!("{label}: giving up after {attempt} attempts: {e}");
                    }
                    return Err(e);
                }
            }
        }
    }
}
