//! Process-wide politeness delay
//!
//! Every outbound request, from any worker or from the browser, first waits
//! on the same [`RateLimiter`]. The wait holds an async mutex for its whole
//! duration, so grants are handed out one at a time and two consecutive
//! grants are always at least `min_delay` apart.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Serializes and jitters request timing across all callers
///
/// Cloning shares the same slot clock.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_delay: Duration,
    max_delay: Duration,
    last_grant: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    /// Creates a limiter with a delay drawn uniformly from `[min_delay, max_delay]` seconds
    ///
    /// Negative bounds are treated as zero and a `max_delay` below
    /// `min_delay` is raised to it.
    pub fn new(min_delay: f64, max_delay: f64) -> Self {
        let min = clamp_secs(min_delay);
        let max = clamp_secs(max_delay).max(min);
        Self {
            min_delay: min,
            max_delay: max,
            last_grant: Arc::new(Mutex::new(None)),
        }
    }

    /// A limiter that never waits
    pub fn unthrottled() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn is_throttled(&self) -> bool {
        !self.max_delay.is_zero()
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Waits for the next request slot
    ///
    /// The first grant is immediate. Later grants wait until a freshly
    /// jittered interval has elapsed since the previous grant.
    ///
    /// # Returns
    ///
    /// * `true` - A slot was granted
    /// * `false` - `cancel` fired while waiting; no slot was taken
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }

        let mut last = tokio::select! {
            guard = self.last_grant.lock() => guard,
            _ = cancel.cancelled() => return false,
        };

        if let Some(previous) = *last {
            let interval = self.next_interval();
            let elapsed = previous.elapsed();
            if elapsed < interval {
                let remaining = interval - elapsed;
                tracing::trace!("Rate limiter sleeping {:?}", remaining);
                tokio::select! {
                    _ = tokio::time::sleep(remaining) => {}
                    _ = cancel.cancelled() => return false,
                }
            }
        }

        *last = Some(Instant::now());
        true
    }

    fn next_interval(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        let secs = rand::rng()
            .random_range(self.min_delay.as_secs_f64()..=self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

fn clamp_secs(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}
