//! Token-bucket rate limiter actor.
//!
//! Tokens refill continuously at `limit` per second up to `burst`. Callers
//! either take tokens immediately ([`TokenBucket::allow`]) or reserve them
//! for a point in the future ([`TokenBucket::reserve`]) and give them back
//! if they end up not acting ([`TokenBucket::cancel_reservation`]).
//!
//! A limit of `f64::INFINITY` means unlimited: every request is granted at
//! once and the bucket is left untouched. JSON has no infinity, so an
//! unlimited rate is written as `null`.

use scrivo_core::{Error, Result};
use scrivo_durable::DurableRuntime;
use serde::{Deserialize, Serialize};

/// Service name of the token-bucket limiter.
pub const SERVICE: &str = "TokenBucket";

const STATE_FIELD: &str = "state";

/// Persisted bucket of one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketState {
    /// Refill rate in tokens per second
    #[serde(with = "rate")]
    pub limit: f64,

    /// Bucket capacity
    pub burst: u32,

    /// Tokens available at `last` (negative while reservations are pending)
    pub tokens: f64,

    /// When `tokens` was last computed (ms since epoch)
    pub last: u64,

    /// Latest time any reservation acts at (ms since epoch)
    pub last_event: u64,
}

impl BucketState {
    /// Tokens available at `now`.
    pub fn tokens_at(&self, now: u64) -> f64 {
        if is_unlimited(self.limit) {
            return f64::from(self.burst);
        }
        let last = self.last.min(now);
        let refilled = self.tokens + tokens_from_duration(self.limit, now - last);
        refilled.min(f64::from(self.burst))
    }
}

/// Outcome of a reservation request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    /// Whether the tokens were reserved
    pub ok: bool,

    /// Tokens reserved
    pub tokens: u32,

    /// When the reservation was made (ms since epoch)
    pub creation_date: u64,

    /// When the caller may act (ms since epoch)
    pub date_to_act: u64,

    /// Refill rate at reservation time
    #[serde(with = "rate")]
    pub limit: f64,
}

/// Body of a reservation request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    /// Tokens wanted
    #[serde(default = "default_tokens")]
    pub n: u32,

    /// Longest acceptable wait, in milliseconds
    #[serde(default)]
    pub wait_limit_ms: u64,
}

/// Body of a rate change. Absent fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRateRequest {
    /// New refill rate in tokens per second
    pub limit: Option<f64>,

    /// New bucket capacity
    pub burst: Option<u32>,
}

/// Body of an immediate-admission request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowRequest {
    /// Tokens wanted
    #[serde(default = "default_tokens")]
    pub n: u32,

    /// Refill rate used if the bucket is new
    #[serde(with = "rate")]
    pub limit: f64,

    /// Capacity used if the bucket is new
    pub burst: u32,
}

fn default_tokens() -> u32 {
    1
}

/// Stores an unlimited rate as `null`.
mod rate {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(limit: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if super::is_unlimited(*limit) {
            serializer.serialize_none()
        } else {
            serializer.serialize_f64(*limit)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

fn is_unlimited(limit: f64) -> bool {
    limit == f64::INFINITY
}

fn duration_from_tokens(limit: f64, tokens: f64) -> f64 {
    if limit <= 0.0 {
        return f64::INFINITY;
    }
    tokens / limit * 1000.0
}

fn tokens_from_duration(limit: f64, duration_ms: u64) -> f64 {
    if limit <= 0.0 {
        return 0.0;
    }
    duration_ms as f64 / 1000.0 * limit
}

fn check_limit(limit: f64) -> Result<()> {
    if limit.is_nan() || limit < 0.0 {
        return Err(Error::validation_field("limit", "must be a non-negative rate"));
    }
    Ok(())
}

/// Per-key token-bucket limiter.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    runtime: DurableRuntime,
}

impl TokenBucket {
    /// Creates a limiter on `runtime`.
    pub fn new(runtime: DurableRuntime) -> Self {
        Self { runtime }
    }

    /// Returns the stored bucket (zeroed if the key was never used).
    pub async fn state(&self, key: &str) -> Result<BucketState> {
        let ctx = self.runtime.object(SERVICE, key).await?;
        Ok(ctx.get(STATE_FIELD).await?.unwrap_or_default())
    }

    /// Returns the tokens available right now.
    pub async fn tokens(&self, key: &str) -> Result<f64> {
        let ctx = self.runtime.object(SERVICE, key).await?;
        let state: BucketState = ctx.get(STATE_FIELD).await?.unwrap_or_default();
        Ok(state.tokens_at(ctx.now_ms()))
    }

    /// Reserves `n` tokens, accepting a wait of at most `wait_limit_ms`.
    ///
    /// A refused reservation has `ok == false` and changes nothing.
    pub async fn reserve(&self, key: &str, n: u32, wait_limit_ms: u64) -> Result<Reservation> {
        let ctx = self.runtime.object(SERVICE, key).await?;
        let state: BucketState = ctx.get(STATE_FIELD).await?.unwrap_or_default();
        let now = ctx.now_ms();

        if is_unlimited(state.limit) {
            return Ok(Reservation {
                ok: true,
                tokens: n,
                creation_date: now,
                date_to_act: now,
                limit: state.limit,
            });
        }

        let tokens = state.tokens_at(now) - f64::from(n);
        let wait_ms = if tokens < 0.0 {
            duration_from_tokens(state.limit, -tokens)
        } else {
            0.0
        };

        if n > state.burst || wait_ms > wait_limit_ms as f64 {
            tracing::debug!(key, n, wait_ms, "Reservation refused");
            return Ok(Reservation {
                ok: false,
                tokens: 0,
                creation_date: now,
                date_to_act: 0,
                limit: state.limit,
            });
        }

        let reservation = Reservation {
            ok: true,
            tokens: n,
            creation_date: now,
            date_to_act: now.saturating_add(wait_ms as u64),
            limit: state.limit,
        };
        let next = BucketState {
            tokens,
            last: now,
            last_event: reservation.date_to_act,
            ..state
        };
        ctx.set(STATE_FIELD, &next).await?;
        Ok(reservation)
    }

    /// Changes the refill rate and/or capacity. Tokens accrued so far under
    /// the old rate are kept.
    pub async fn set_rate(&self, key: &str, limit: Option<f64>, burst: Option<u32>) -> Result<()> {
        if limit.is_none() && burst.is_none() {
            return Ok(());
        }
        if let Some(limit) = limit {
            check_limit(limit)?;
        }

        let ctx = self.runtime.object(SERVICE, key).await?;
        let mut state: BucketState = ctx.get(STATE_FIELD).await?.unwrap_or_default();
        let now = ctx.now_ms();

        state.tokens = state.tokens_at(now);
        state.last = now;
        if let Some(limit) = limit {
            state.limit = limit;
        }
        if let Some(burst) = burst {
            state.burst = burst;
        }
        ctx.set(STATE_FIELD, &state).await
    }

    /// Returns the tokens of a reservation that will not be used.
    ///
    /// Tokens already claimed by later reservations stay claimed, and
    /// reservations whose time has passed are not refunded.
    pub async fn cancel_reservation(&self, key: &str, reservation: &Reservation) -> Result<()> {
        let ctx = self.runtime.object(SERVICE, key).await?;
        let mut state: BucketState = ctx.get(STATE_FIELD).await?.unwrap_or_default();
        let now = ctx.now_ms();

        if is_unlimited(state.limit)
            || is_unlimited(reservation.limit)
            || reservation.tokens == 0
            || reservation.date_to_act < now
        {
            return Ok(());
        }

        let claimed_after = if state.last_event > reservation.date_to_act {
            tokens_from_duration(reservation.limit, state.last_event - reservation.date_to_act)
        } else {
            0.0
        };
        let restore = f64::from(reservation.tokens) - claimed_after;
        if restore <= 0.0 {
            return Ok(());
        }

        state.tokens = (state.tokens_at(now) + restore).min(f64::from(state.burst));
        state.last = now;

        if reservation.date_to_act == state.last_event {
            let span = duration_from_tokens(reservation.limit, f64::from(reservation.tokens));
            let previous = reservation.date_to_act.saturating_sub(span as u64);
            if previous >= now {
                state.last_event = previous;
            }
        }

        ctx.set(STATE_FIELD, &state).await
    }

    /// Takes `n` tokens now or fails with a terminal rate-limit error.
    ///
    /// A bucket that was never configured is initialised full with `limit`
    /// and `burst`.
    pub async fn allow(&self, key: &str, n: u32, limit: f64, burst: u32) -> Result<()> {
        check_limit(limit)?;
        let ctx = self.runtime.object(SERVICE, key).await?;
        let mut state: BucketState = ctx.get(STATE_FIELD).await?.unwrap_or_default();

        let fresh = state.burst == 0;
        if fresh {
            state.limit = limit;
            state.burst = burst;
            state.tokens = f64::from(burst);
        }

        if is_unlimited(state.limit) {
            if fresh {
                ctx.set(STATE_FIELD, &state).await?;
            }
            return Ok(());
        }

        let now = ctx.now_ms();
        let tokens = state.tokens_at(now) - f64::from(n);
        if n > state.burst || tokens < 0.0 {
            tracing::info!(key, n, "Token bucket exhausted");
            return Err(Error::rate_limited());
        }

        state.tokens = tokens;
        state.last = now;
        state.last_event = now;
        ctx.set(STATE_FIELD, &state).await
    }

    /// Forgets the bucket for `key`.
    pub async fn reset(&self, key: &str) -> Result<()> {
        let ctx = self.runtime.object(SERVICE, key).await?;
        ctx.clear(STATE_FIELD).await
    }
}
