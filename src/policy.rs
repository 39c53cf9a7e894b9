//! Retry policy and the backoff schedule it produces.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Immutable description of how many additional attempts a retry loop may
/// make and how long to wait between them.
///
/// `max_retries` counts *additional* attempts after the first: a fresh
/// `execute` call makes at most `max_retries + 1` total attempts. The
/// schedule produced by [`RetryPolicy::backoff`] always yields exactly
/// `max_retries` delays, one sleep between each pair of attempts and none
/// after the last.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Symmetric jitter fraction in `[0, 1]`: the emitted delay is the
    /// pre-jitter value plus uniform noise in `[-jitter * d, +jitter * d]`,
    /// clamped to `[0, max_delay]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration, jitter: f64) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            jitter,
        }
    }

    /// Conservative policy for read operations: short delays, few attempts.
    pub fn for_reads() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            jitter: 0.2,
        }
    }

    /// More aggressive policy for write operations.
    pub fn for_writes() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(3),
            jitter: 0.2,
        }
    }

    /// Policy for critical operations: more attempts, no jitter so behavior
    /// stays predictable under test and during incident response.
    pub fn for_critical() -> Self {
        Self {
            max_retries: 6,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter: 0.0,
        }
    }

    /// Produce the finite backoff schedule for one `execute` call.
    ///
    /// Each call to this method (and each call to `.next()` on the returned
    /// iterator) draws its own jitter, so concurrent `execute` calls sharing
    /// one `RetryPolicy` value get independent schedules.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            remaining: self.max_retries,
            current: self.initial_delay,
        }
    }
}

/// Lazy, finite iterator of backoff delays. Yields exactly `max_retries`
/// items, in the order described by [`RetryPolicy`]'s doc comment.
pub struct Backoff {
    policy: RetryPolicy,
    remaining: u32,
    current: Duration,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let d = self.current.as_secs_f64();
        let jitter_span = d * self.policy.jitter;
        let noise = if jitter_span > 0.0 {
            rand::rng().random_range(-jitter_span..=jitter_span)
        } else {
            0.0
        };
        let max_delay = self.policy.max_delay.as_secs_f64();
        let emitted = (d + noise).max(0.0).min(max_delay);

        self.current = Duration::from_secs_f64((d * 2.0).min(max_delay));

        Some(Duration::from_secs_f64(emitted))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Backoff {}
