//! Workflow settings.

use std::time::Duration;

use scrivo_durable::RetryPolicy;
use scrivo_rate_limit::RateLimitPolicy;
use serde::{Deserialize, Serialize};

/// Default validity of signed audio URLs, in seconds.
pub const DEFAULT_SIGNED_URL_TTL_SECS: u64 = 3600;

/// Default time to wait for a provider callback, in seconds.
pub const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 600;

/// Settings shared by every transcription job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Externally reachable base URL of this service. Callback URLs handed
    /// to providers are built from it.
    pub public_url: String,

    /// Validity of the signed audio URL given to the provider
    pub signed_url_ttl_secs: u64,

    /// How long a job waits for its provider callback. `None` waits forever.
    pub callback_timeout_secs: Option<u64>,

    /// Retry schedule for provider calls
    pub retry: RetryPolicy,

    /// Retry schedule for re-driving a job after the state store failed
    pub store_retry: RetryPolicy,

    /// Rate limit applied when a job does not carry its own
    pub rate_limit: RateLimitPolicy,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            public_url: "http://localhost:8080".to_string(),
            signed_url_ttl_secs: DEFAULT_SIGNED_URL_TTL_SECS,
            callback_timeout_secs: Some(DEFAULT_CALLBACK_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            store_retry: default_store_retry(),
            rate_limit: RateLimitPolicy::default(),
        }
    }
}

fn default_store_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 20,
        ..RetryPolicy::default()
    }
}

impl WorkflowConfig {
    /// Sets the public base URL.
    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = url.into();
        self
    }

    /// Sets the callback timeout; `None` disables it.
    pub fn with_callback_timeout(mut self, secs: Option<u64>) -> Self {
        self.callback_timeout_secs = secs;
        self
    }

    /// Sets the retry schedule for provider calls.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the retry schedule used while the state store is unavailable.
    pub fn with_store_retry(mut self, store_retry: RetryPolicy) -> Self {
        self.store_retry = store_retry;
        self
    }

    /// Sets the default rate limit.
    pub fn with_rate_limit(mut self, rate_limit: RateLimitPolicy) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Callback timeout as a duration.
    pub fn callback_timeout(&self) -> Option<Duration> {
        self.callback_timeout_secs.map(Duration::from_secs)
    }
}
