//! Retry delay policies with exponential backoff

use std::time::Duration;

/// Retry delay policy for recoverable failures.
///
/// The retry budget itself lives on the job (`retry_count` vs
/// `max_retries`); the policy only decides how long to wait before the
/// next attempt.
#[derive(Debug, Clone)]
pub enum RetryPolicy {
    /// Never retry, regardless of budget
    None,

    /// Fixed delay between attempts
    Fixed { delay: Duration },

    /// Exponential backoff
    Exponential(ExponentialBackoff),
}

impl RetryPolicy {
    /// Delay before the attempt following `retry_count` consumed retries.
    ///
    /// Returns `None` when the policy forbids retrying.
    pub fn delay_for(&self, retry_count: u32) -> Option<Duration> {
        match self {
            RetryPolicy::None => None,
            RetryPolicy::Fixed { delay } => Some(*delay),
            RetryPolicy::Exponential(backoff) => Some(backoff.delay_for(retry_count)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Exponential(ExponentialBackoff::default())
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Cap applied after multiplication
    pub max_delay: Duration,

    /// Multiplier per consumed retry (usually 2.0)
    pub multiplier: f64,

    /// Jitter factor (0.0 - 1.0) to randomize delays
    pub jitter: f64,
}

impl ExponentialBackoff {
    /// Create a backoff schedule
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter: 0.0,
        }
    }

    /// With jitter factor
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay for the attempt following `retry_count` consumed retries:
    /// `initial × multiplier^retry_count`, capped at `max_delay`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(retry_count as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter > 0.0 {
            use rand::Rng;
            let range = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-range..=range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}
