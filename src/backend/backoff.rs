//! Exponential cool-down with jitter between workflow retries.
//!
//! [`BackoffConfig`] computes how long the engine pauses before re-entering
//! the render stage after a transient failure. Rate-limit rejections bypass
//! this schedule and use the backend's hint instead (see
//! [`RetryPolicy`](crate::retry::RetryPolicy)).

use std::time::Duration;

/// Configuration for exponential backoff with jitter.
///
/// # Example
///
/// ```
/// use doc_pipeline::backend::BackoffConfig;
///
/// let none = BackoffConfig::none();
/// assert_eq!(none.delay_for_attempt(4), std::time::Duration::ZERO);
///
/// let standard = BackoffConfig::standard();
/// assert_eq!(standard.multiplier, 2.0);
/// ```
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry. Default: 1 second.
    pub initial_delay: Duration,

    /// Multiplier applied to delay after each retry. Default: 2.0.
    /// Delay grows: initial, initial * multiplier, initial * multiplier^2, ...
    pub multiplier: f64,

    /// Maximum delay between retries. Default: 60 seconds.
    pub max_delay: Duration,

    /// Jitter strategy. Default: Full.
    pub jitter: JitterStrategy,
}

/// Jitter strategy to keep concurrent requests from retrying in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterStrategy {
    /// No jitter. Delay is exactly the calculated value.
    None,

    /// Full jitter: random value in `[0, calculated_delay]`.
    Full,

    /// Equal jitter: `calculated_delay/2 + random in [0, calculated_delay/2]`.
    Equal,
}

impl BackoffConfig {
    /// Retry immediately. Useful for tests and local backends.
    pub fn none() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            jitter: JitterStrategy::None,
            ..Self::standard()
        }
    }

    /// 1s initial, 2x multiplier, 60s max, full jitter.
    pub fn standard() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: JitterStrategy::Full,
        }
    }

    /// Short pauses for interactive use (user is waiting):
    /// 500ms initial, 1.5x multiplier, 10s max.
    pub fn interactive() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            multiplier: 1.5,
            max_delay: Duration::from_secs(10),
            jitter: JitterStrategy::Full,
        }
    }

    /// Calculate the delay for retry N (0-indexed).
    ///
    /// The base delay is `initial_delay * multiplier^attempt`, capped at
    /// `max_delay`. Jitter is then applied according to the configured strategy.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full => fastrand::f64() * capped,
            JitterStrategy::Equal => capped / 2.0 + fastrand::f64() * (capped / 2.0),
        };

        Duration::from_secs_f64(jittered)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::standard()
    }
}
