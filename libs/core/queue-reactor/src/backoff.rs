//! Reconnect backoff policy.
//!
//! While errors are sparse (up to the threshold) reactors retry at the base
//! delay. Past the threshold the delay doubles with every extra consecutive
//! error until it reaches the cap.
//!
//! ```text
//! errors:  1 .. 15   16     17     18     ...   22+
//! delay:   600ms     1.2s   2.4s   4.8s   ...   60s
//! ```

use std::fmt;
use std::time::Duration;

/// Errors tolerated at the base delay before the delay starts growing.
pub const DEFAULT_THRESHOLD: u32 = 15;

/// Delay used while the error count stays at or below the threshold.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(600);

/// Upper bound for any computed delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Compute the reconnect delay for `error_count` consecutive errors.
///
/// Non-decreasing in `error_count`, equal to `base_delay` up to and including
/// the threshold, never above `max_delay`.
pub fn compute(
    error_count: u32,
    threshold: u32,
    base_delay: Duration,
    max_delay: Duration,
) -> Duration {
    if error_count <= threshold {
        return base_delay.min(max_delay);
    }

    // 2^excess saturates at u32::MAX instead of overflowing the shift.
    let excess = error_count - threshold;
    let multiplier = 1u32.checked_shl(excess).unwrap_or(u32::MAX);
    base_delay
        .checked_mul(multiplier)
        .unwrap_or(max_delay)
        .min(max_delay)
}

/// Strategy deciding how long a reactor waits before reconnecting.
///
/// [`BackoffPolicy`] is the default; hosts can plug in their own curve
/// through [`ReactorConfig::with_backoff`](crate::ReactorConfig::with_backoff).
pub trait ReconnectBackoff: fmt::Debug + Send + Sync {
    /// Delay to wait after `error_count` consecutive errors.
    fn delay_for(&self, error_count: u32) -> Duration;
}

/// Threshold-then-exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Errors tolerated at the base delay
    pub threshold: u32,
    /// Delay at or below the threshold
    pub base_delay: Duration,
    /// Cap for the grown delay
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Create a policy with explicit values
    pub fn new(threshold: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            threshold,
            base_delay,
            max_delay,
        }
    }

    /// Set the threshold
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl ReconnectBackoff for BackoffPolicy {
    fn delay_for(&self, error_count: u32) -> Duration {
        compute(error_count, self.threshold, self.base_delay, self.max_delay)
    }
}
