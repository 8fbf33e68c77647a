//! Fixed-window rate limiter actor.

use scrivo_core::{Error, Result};
use scrivo_durable::DurableRuntime;
use serde::{Deserialize, Serialize};

/// Service name of the fixed-window limiter.
pub const SERVICE: &str = "RateLimiter";

const WINDOW_FIELD: &str = "window";

/// Window size and capacity for one `check_and_consume` call.
///
/// Supplied per call, so different callers may apply different policies to
/// the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitPolicy {
    /// Window length in milliseconds
    pub window_ms: u64,

    /// Calls admitted per window
    pub max_in_window: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_in_window: 5,
        }
    }
}

/// Persisted counter of one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowState {
    /// When the current window opened (ms since epoch)
    pub window_start_ms: u64,

    /// Calls admitted in the current window
    pub count: u32,
}

impl WindowState {
    /// Returns the state to apply the policy to at `now`: the stored
    /// window if it is still open, a fresh one otherwise.
    pub fn current(stored: Option<WindowState>, now: u64, window_ms: u64) -> WindowState {
        match stored {
            Some(state) if now.saturating_sub(state.window_start_ms) < window_ms => state,
            _ => WindowState {
                window_start_ms: now,
                count: 0,
            },
        }
    }
}

/// Per-key fixed-window limiter.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    runtime: DurableRuntime,
}

impl RateLimiter {
    /// Creates a limiter on `runtime`.
    pub fn new(runtime: DurableRuntime) -> Self {
        Self { runtime }
    }

    /// Admits one call for `key` or rejects it.
    ///
    /// On admission the incremented state is persisted and returned. On
    /// rejection the (possibly reset) state is persisted, nothing is
    /// consumed and a terminal rate-limit error is returned.
    pub async fn check_and_consume(&self, key: &str, policy: RateLimitPolicy) -> Result<WindowState> {
        if policy.window_ms == 0 {
            return Err(Error::validation_field("windowMs", "must be positive"));
        }

        let ctx = self.runtime.object(SERVICE, key).await?;
        let now = ctx.now_ms();
        let stored = ctx.get::<WindowState>(WINDOW_FIELD).await?;
        let mut state = WindowState::current(stored, now, policy.window_ms);

        if state.count >= policy.max_in_window {
            ctx.set(WINDOW_FIELD, &state).await?;
            tracing::info!(
                key,
                count = state.count,
                max = policy.max_in_window,
                "Rate limit exceeded"
            );
            return Err(Error::rate_limited());
        }

        state.count += 1;
        ctx.set(WINDOW_FIELD, &state).await?;
        tracing::debug!(key, count = state.count, max = policy.max_in_window, "Admitted");
        Ok(state)
    }

    /// Returns the stored counter for `key`, if any.
    pub async fn usage(&self, key: &str) -> Result<Option<WindowState>> {
        let ctx = self.runtime.object(SERVICE, key).await?;
        ctx.get(WINDOW_FIELD).await
    }

    /// Clears the counter for `key`.
    pub async fn reset(&self, key: &str) -> Result<()> {
        let ctx = self.runtime.object(SERVICE, key).await?;
        ctx.clear(WINDOW_FIELD).await
    }
}
