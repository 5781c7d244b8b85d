//! Retry rules for step forward actions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff rule applied to a step's retryable failures.
///
/// Rules carry no mutable state: the decision is a pure function of how many
/// attempts have been made and how long the step has been running, so a rule
/// value can never leak progress from one flight run into another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryRule {
    /// Retryable failures are escalated immediately.
    #[default]
    None,
    /// Sleep `interval` between attempts; at most `max_count` attempts in total.
    FixedInterval { interval: Duration, max_count: u32 },
    /// Delay doubles from `initial` up to `max`; no attempt is scheduled once
    /// the step's elapsed time plus the next delay would exceed `max_elapsed`.
    ExponentialBackoff {
        initial: Duration,
        max: Duration,
        max_elapsed: Duration,
    },
}

impl RetryRule {
    pub fn none() -> Self {
        RetryRule::None
    }

    pub fn fixed_interval(interval: Duration, max_count: u32) -> Self {
        RetryRule::FixedInterval {
            interval,
            max_count,
        }
    }

    pub fn exponential_backoff(initial: Duration, max: Duration, max_elapsed: Duration) -> Self {
        RetryRule::ExponentialBackoff {
            initial,
            max,
            max_elapsed,
        }
    }

    /// Delay before the next attempt, given `attempts` failed attempts so far
    /// (1-indexed) and the time spent on this step. `None` means the retry
    /// budget is exhausted.
    pub fn next_delay(&self, attempts: u32, elapsed: Duration) -> Option<Duration> {
        match *self {
            RetryRule::None => None,
            RetryRule::FixedInterval {
                interval,
                max_count,
            } => (attempts < max_count).then_some(interval),
            RetryRule::ExponentialBackoff {
                initial,
                max,
                max_elapsed,
            } => {
                let exp = attempts.saturating_sub(1).min(31);
                let delay = initial.saturating_mul(1u32 << exp).min(max);
                (elapsed.saturating_add(delay) <= max_elapsed).then_some(delay)
            }
        }
    }

    /// Retry for cloud calls. If the provider is down we don't know when it
    /// will be back, so don't wait forever.
    pub fn cloud() -> Self {
        Self::fixed_interval(Duration::from_secs(10), 10)
    }

    /// Cloud operations that may take a couple of minutes to respond.
    pub fn cloud_long_running() -> Self {
        Self::exponential_backoff(
            Duration::from_secs(1),
            Duration::from_secs(8),
            Duration::from_secs(5 * 60),
        )
    }

    /// Operations that should complete within a few seconds.
    pub fn short_exponential() -> Self {
        Self::exponential_backoff(
            Duration::from_secs(1),
            Duration::from_secs(8),
            Duration::from_secs(16),
        )
    }

    /// Metadata database writes.
    pub fn short_database() -> Self {
        Self::fixed_interval(Duration::from_secs(1), 5)
    }

    /// Project pool checkout; the pool may need time to create a new project.
    pub fn buffer() -> Self {
        Self::exponential_backoff(
            Duration::from_secs(1),
            Duration::from_secs(5 * 60),
            Duration::from_secs(15 * 60),
        )
    }
}
