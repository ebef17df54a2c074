//! Bounded exponential backoff shared by every component that retries.
//!
//! The delay before retry `n` (zero-based) is `min(max_delay, base_delay * 2^n)`.
//! With jitter enabled, half of that delay is fixed and the other half is
//! drawn uniformly at random ("equal jitter"), so a herd of clients that lost
//! the same backend does not reconnect in lockstep.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::duration;

/// Retry budget and backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `1` disables retry.
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(with = "duration::millis", rename = "base_delay_ms")]
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    #[serde(with = "duration::millis", rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// Randomise half of each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub const fn never() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub const fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// The capped exponential delay before retry `retry`, without jitter.
    pub fn ceiling_for(&self, retry: u32) -> Duration {
        2_u32
            .checked_pow(retry)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// The delay to wait before retry `retry` (zero-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let ceiling = self.ceiling_for(retry);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }
        let half = ceiling.checked_div(2).unwrap_or_default();
        let spread = rand::rng().random_range(Duration::ZERO..=half);
        ceiling.saturating_sub(half).saturating_add(spread)
    }
}
