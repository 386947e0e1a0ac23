//! Retry with exponential backoff
//!
//! One [`RetryPolicy`] drives both the HTTP path and browser navigation.
//! The operation decides per attempt whether it is done or worth retrying;
//! the policy owns the attempt budget and the delay between attempts.
//!
//! ```text
//! delay = min(base * factor^attempt, cap) + uniform(0, jitter)
//! ```

use crate::config::FetchConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Statuses worth retrying when no other rule claims the response
pub const DEFAULT_RETRY_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// Result of one attempt
#[derive(Debug)]
pub enum Attempt<T> {
    /// Terminal result, returned as is
    Done(T),
    /// Transient failure; try again if the budget allows
    Retry {
        status: Option<u16>,
        error: String,
    },
}

/// Why [`RetryPolicy::run`] gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    Exhausted {
        attempts: u32,
        status: Option<u16>,
        last_error: String,
    },
    Cancelled {
        attempts: u32,
    },
}

/// Attempt budget, retryable statuses and backoff shape
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    retry_statuses: Vec<u16>,
    base: f64,
    factor: f64,
    jitter: f64,
    cap: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
            base: 1.0,
            factor: 1.6,
            jitter: 0.4,
            cap: 30.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.retries.max(1),
            retry_statuses: config.retry_statuses.clone(),
            base: config.backoff_base.max(0.0),
            factor: config.backoff_factor.max(1.0),
            jitter: config.backoff_jitter.max(0.0),
            cap: config.backoff_cap.max(0.0),
        }
    }

    /// A policy that retries without sleeping in between
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base: 0.0,
            jitter: 0.0,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Delay slept after the 1-based `attempt` failed
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base * self.factor.powi(attempt as i32);
        let capped = exp.min(self.cap);
        let jitter = if self.jitter > 0.0 {
            rand::rng().random_range(0.0..=self.jitter)
        } else {
            0.0
        };
        let secs = capped + jitter;
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }

    /// Runs `op` until it is done, the budget is spent or `cancel` fires
    ///
    /// `op` receives the 1-based attempt number.
    ///
    /// # Returns
    ///
    /// * `Ok(T)` - The first `Attempt::Done` value
    /// * `Err(RetryError::Exhausted)` - Every attempt asked for a retry
    /// * `Err(RetryError::Cancelled)` - Cancelled before or between attempts
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let mut last_status = None;
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled {
                    attempts: attempt - 1,
                });
            }

            match op(attempt).await {
                Attempt::Done(value) => return Ok(value),
                Attempt::Retry { status, error } => {
                    tracing::debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        status,
                        "Attempt failed: {}",
                        error
                    );
                    last_status = status;
                    last_error = error;
                }
            }

            if attempt < self.max_attempts {
                let delay = self.backoff(attempt);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(RetryError::Cancelled { attempts: attempt });
                    }
                }
            }
        }

        Err(RetryError::Exhausted {
            attempts: self.max_attempts,
            status: last_status,
            last_error,
        })
    }
}
