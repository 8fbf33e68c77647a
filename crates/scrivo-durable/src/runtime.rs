//! The durable runtime.
//!
//! [`DurableRuntime`] owns the state store, the per-key locks, the promise
//! wakeup registry and the clock. Workflows run through
//! [`DurableRuntime::run_workflow`], which records an invocation record per
//! instance so that a duplicate submission returns the first outcome and an
//! interrupted instance can be resumed with its original input.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scrivo_core::{Error, FailureRecord, InstanceKey, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::context::{ObjectContext, SharedContext, WorkflowContext};
use crate::locks::KeyedLocks;
use crate::promise::{DurablePromise, PromiseWaiters};
use crate::store::{InMemoryStateStore, Scope, StateStore};

const INVOCATION_FIELD: &str = "$invocation";

/// Default interval at which promise awaiters re-read the store.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A durable workflow: a body that runs at most once to completion per key.
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    /// Service name. Scopes the workflow's state and appears in URLs.
    const NAME: &'static str;

    /// Input accepted by the body.
    type Input: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Output produced by the body.
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Runs the body. May be called again for the same key after a crash;
    /// side effects must go through `ctx` steps to be replay-safe.
    async fn run(&self, ctx: &WorkflowContext, input: Self::Input) -> Result<Self::Output>;
}

/// Lifecycle record of one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Invocation {
    /// Started and not yet finished.
    Running {
        /// Input of the first submission
        input: Value,
        /// When the first execution started
        started_at: DateTime<Utc>,
        /// Number of executions so far
        attempts: u32,
    },

    /// Finished with an output.
    Completed {
        /// Input of the first submission
        input: Value,
        /// Output returned by the body
        output: Value,
        /// When the body returned
        completed_at: DateTime<Utc>,
    },

    /// Finished with an error.
    Failed {
        /// Input of the first submission
        input: Value,
        /// Error returned by the body
        error: FailureRecord,
        /// When the body returned
        completed_at: DateTime<Utc>,
    },
}

impl Invocation {
    /// Returns `true` while the instance still needs to run.
    pub fn is_running(&self) -> bool {
        matches!(self, Invocation::Running { .. })
    }
}

struct Inner {
    store: Arc<dyn StateStore>,
    locks: KeyedLocks,
    waiters: PromiseWaiters,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

/// Entry point for running workflows and addressing virtual objects.
///
/// Cheap to clone; clones share the same store, locks and wakeups.
#[derive(Clone)]
pub struct DurableRuntime {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DurableRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableRuntime")
            .field("poll_interval", &self.inner.poll_interval)
            .finish_non_exhaustive()
    }
}

impl Default for DurableRuntime {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl DurableRuntime {
    /// Starts building a runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Creates a runtime over `store` with the system clock.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self::builder().store(store).build()
    }

    /// The underlying state store.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.inner.store
    }

    /// The runtime's clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub(crate) fn promise<T>(&self, scope: Scope, name: &str) -> DurablePromise<T>
    where
        T: Serialize + DeserializeOwned,
    {
        DurablePromise::new(
            scope,
            name,
            Arc::clone(&self.inner.store),
            self.inner.waiters.clone(),
            self.inner.poll_interval,
        )
    }

    pub(crate) async fn load_invocation(&self, scope: &Scope) -> Result<Option<Invocation>> {
        match self.inner.store.get(scope, INVOCATION_FIELD).await? {
            Some(raw) => Ok(Some(serde_json::from_value(raw)?)),
            None => Ok(None),
        }
    }

    async fn save_invocation(&self, scope: &Scope, invocation: &Invocation) -> Result<()> {
        self.inner
            .store
            .set(scope, INVOCATION_FIELD, serde_json::to_value(invocation)?)
            .await
    }

    /// Runs (or resumes) instance `key` of workflow `W`.
    ///
    /// - A finished instance returns its recorded output or error without
    ///   running the body.
    /// - An interrupted instance resumes with the input it was first
    ///   submitted with; `input` is ignored.
    /// - Executions of the same instance are serialized.
    pub async fn run_workflow<W: Workflow>(
        &self,
        workflow: &W,
        key: &InstanceKey,
        input: W::Input,
    ) -> Result<W::Output> {
        let scope = Scope::new(W::NAME, key.as_str())?;
        let _guard = self.inner.locks.acquire(&scope).await;

        let (input, raw_input) = match self.load_invocation(&scope).await? {
            Some(Invocation::Completed { output, .. }) => {
                tracing::debug!(workflow = W::NAME, key = %key, "Instance already completed");
                return Ok(serde_json::from_value(output)?);
            }
            Some(Invocation::Failed { error, .. }) => {
                tracing::debug!(workflow = W::NAME, key = %key, "Instance already failed");
                return Err(error.into());
            }
            Some(Invocation::Running {
                input: raw,
                started_at,
                attempts,
            }) => {
                tracing::info!(workflow = W::NAME, key = %key, attempt = attempts + 1, "Resuming workflow");
                self.save_invocation(
                    &scope,
                    &Invocation::Running {
                        input: raw.clone(),
                        started_at,
                        attempts: attempts + 1,
                    },
                )
                .await?;
                (serde_json::from_value(raw.clone())?, raw)
            }
            None => {
                tracing::info!(workflow = W::NAME, key = %key, "Starting workflow");
                let raw = serde_json::to_value(&input)?;
                self.save_invocation(
                    &scope,
                    &Invocation::Running {
                        input: raw.clone(),
                        started_at: Utc::now(),
                        attempts: 1,
                    },
                )
                .await?;
                (input, raw)
            }
        };

        let ctx = WorkflowContext::load(self.clone(), scope.clone(), key.clone()).await?;
        let result = workflow.run(&ctx, input).await;

        match &result {
            Ok(output) => {
                self.save_invocation(
                    &scope,
                    &Invocation::Completed {
                        input: raw_input,
                        output: serde_json::to_value(output)?,
                        completed_at: Utc::now(),
                    },
                )
                .await?;
                tracing::info!(workflow = W::NAME, key = %key, "Workflow completed");
            }
            Err(Error::Storage { message }) => {
                tracing::warn!(
                    workflow = W::NAME,
                    key = %key,
                    error = %message,
                    "Workflow interrupted by store failure, left resumable"
                );
            }
            Err(err) => {
                self.save_invocation(
                    &scope,
                    &Invocation::Failed {
                        input: raw_input,
                        error: FailureRecord::from(err),
                        completed_at: Utc::now(),
                    },
                )
                .await?;
                tracing::info!(workflow = W::NAME, key = %key, error = %err, "Workflow failed");
            }
        }
        result
    }

    /// Resumes instance `key` if it is still running. Returns `None` for
    /// instances that were never started or already finished.
    pub async fn resume<W: Workflow>(
        &self,
        workflow: &W,
        key: &InstanceKey,
    ) -> Result<Option<W::Output>> {
        let scope = Scope::new(W::NAME, key.as_str())?;
        match self.load_invocation(&scope).await? {
            Some(Invocation::Running { input, .. }) => {
                let input = serde_json::from_value(input)?;
                self.run_workflow(workflow, key, input).await.map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Keys of `service` instances that started and have not finished.
    pub async fn pending(&self, service: &str) -> Result<Vec<InstanceKey>> {
        let mut pending = Vec::new();
        for key in self.inner.store.keys(service).await? {
            let scope = Scope::new(service, key.as_str())?;
            if let Some(invocation) = self.load_invocation(&scope).await?
                && invocation.is_running()
            {
                pending.push(InstanceKey::new(key)?);
            }
        }
        Ok(pending)
    }

    /// Invocation record of one instance.
    pub async fn invocation(&self, service: &str, key: &str) -> Result<Option<Invocation>> {
        self.load_invocation(&Scope::new(service, key)?).await
    }

    /// Shared (non-exclusive) access to one workflow instance.
    pub fn shared(&self, service: &str, key: &str) -> Result<SharedContext> {
        Ok(SharedContext::new(self.clone(), Scope::new(service, key)?))
    }

    /// Exclusive access to one virtual object. Waits for any handler
    /// currently holding the same key.
    pub async fn object(&self, service: &str, key: &str) -> Result<ObjectContext> {
        let scope = Scope::new(service, key)?;
        let guard = self.inner.locks.acquire(&scope).await;
        Ok(ObjectContext::new(self.clone(), scope, guard))
    }
}

/// Builder for [`DurableRuntime`].
#[derive(Default)]
pub struct RuntimeBuilder {
    store: Option<Arc<dyn StateStore>>,
    clock: Option<Arc<dyn Clock>>,
    poll_interval: Option<Duration>,
}

impl std::fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl RuntimeBuilder {
    /// Uses `store` for state (default: in-memory).
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Uses `clock` for time reads (default: system clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets how often promise awaiters re-read the store.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Builds the runtime.
    pub fn build(self) -> DurableRuntime {
        DurableRuntime {
            inner: Arc::new(Inner {
                store: self
                    .store
                    .unwrap_or_else(|| Arc::new(InMemoryStateStore::new())),
                locks: KeyedLocks::new(),
                waiters: PromiseWaiters::default(),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                poll_interval: self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            }),
        }
    }
}
