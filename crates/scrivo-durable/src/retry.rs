//! Retry policy for step bodies that call external collaborators.

use std::time::Duration;

use backon::ExponentialBuilder;
use serde::{Deserialize, Serialize};

/// Exponential backoff settings.
///
/// Only errors classified as retryable are retried; terminal errors fail the
/// step on the first attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,

    /// Multiplier applied to the delay after each retry
    pub factor: f32,

    /// Upper bound on any single delay, in milliseconds
    pub max_delay_ms: u64,

    /// Total attempts, including the first one
    pub max_attempts: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            factor: 2.0,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Builds the backoff schedule for this policy.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.initial_delay_ms))
            .with_factor(self.factor)
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_attempts.saturating_sub(1))
    }
}
