//! Deterministic exponential backoff for reconnection delays.
//!
//! `delay = min(cap, base * 2^attempt)`. The sequence never decreases until
//! [`Backoff::reset`] is called after a successful connection.

use std::time::Duration;

/// Exponential backoff calculator.
#[derive(Debug)]
pub(crate) struct Backoff {
    /// Base delay in milliseconds.
    base_ms: u64,
    /// Maximum delay cap in milliseconds.
    max_ms: u64,
    /// Current attempt number (0-indexed).
    attempt: u32,
}

impl Backoff {
    /// Create a new backoff calculator.
    pub(super) fn new(base: Duration, max: Duration) -> Self {
        Self {
            base_ms: u64::try_from(base.as_millis()).unwrap_or(u64::MAX),
            max_ms: u64::try_from(max.as_millis()).unwrap_or(u64::MAX),
            attempt: 0,
        }
    }

    /// Compute the next delay and advance the attempt.
    pub(super) fn next_delay(&mut self) -> Duration {
        let exp = self
            .base_ms
            .saturating_mul(1u64.checked_shl(self.attempt).unwrap_or(u64::MAX));
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(exp.min(self.max_ms))
    }

    /// Number of delays handed out since the last reset.
    pub(super) fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Reset the attempt counter after a successful connection.
    pub(super) fn reset(&mut self) {
        self.attempt = 0;
    }
}
