//! Delay growth for dial retries and registration polling.

use std::time::Duration;

/// Exponential delay policy.
///
/// The delay for attempt `n` (0-indexed) is `first × factor^n`, clamped to
/// `max`. Each attempt derives its delay independently of the previous one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    /// Delay for the first attempt.
    pub first: Duration,

    /// Multiplicative growth per attempt.
    pub factor: f64,

    /// Upper bound for any delay.
    pub max: Duration,
}

impl Backoff {
    /// Creates a policy.
    #[must_use]
    pub const fn new(first: Duration, factor: f64, max: Duration) -> Self {
        Self { first, factor, max }
    }

    /// Delay before retry number `attempt`.
    #[must_use]
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}
