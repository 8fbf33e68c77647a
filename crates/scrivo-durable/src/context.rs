//! Handler contexts.
//!
//! - [`WorkflowContext`]: handed to a workflow body. Steps are memoized and
//!   state writes are journaled, so re-running the body after a crash
//!   replays completed work instead of repeating it.
//! - [`SharedContext`]: concurrent read access plus promise settlement for
//!   one workflow instance. Used by callback and status handlers.
//! - [`ObjectContext`]: exclusive read-write access to one virtual object.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use backon::Retryable;
use scrivo_core::{Error, InstanceKey, Result, StepName, StepRecord};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::locks::KeyGuard;
use crate::promise::DurablePromise;
use crate::retry::RetryPolicy;
use crate::runtime::{DurableRuntime, Invocation};
use crate::store::{Mutation, Scope};

pub(crate) const JOURNAL_FIELD: &str = "$journal";
const STEP_PREFIX: &str = "$step:";

fn step_field(name: &str) -> String {
    format!("{STEP_PREFIX}{name}")
}

fn check_user_field(field: &str) -> Result<()> {
    if field.is_empty() {
        return Err(Error::validation_field("field", "must not be empty"));
    }
    if field.starts_with('$') {
        return Err(Error::validation_field(
            "field",
            format!("'{field}' is reserved for the runtime"),
        ));
    }
    Ok(())
}

/// Replay bookkeeping persisted with each workflow instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Journal {
    /// Completed steps, in completion order
    pub steps: Vec<String>,

    /// State writes the body has performed so far, in order
    #[serde(default)]
    pub writes: Vec<JournalWrite>,
}

/// One journaled state write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalWrite {
    /// Field written
    pub field: String,

    /// Value written, `None` for a clear
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl JournalWrite {
    fn into_mutation(self) -> Mutation {
        match self.value {
            Some(value) => Mutation::set(self.field, value),
            None => Mutation::clear(self.field),
        }
    }
}

/// Context for one execution of a workflow body.
pub struct WorkflowContext {
    runtime: DurableRuntime,
    scope: Scope,
    key: InstanceKey,
    journal: Mutex<Journal>,
    replayed: Vec<JournalWrite>,
    write_seq: AtomicUsize,
    diverged: AtomicBool,
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("scope", &self.scope)
            .field("replayed_writes", &self.replayed.len())
            .finish_non_exhaustive()
    }
}

impl WorkflowContext {
    pub(crate) async fn load(runtime: DurableRuntime, scope: Scope, key: InstanceKey) -> Result<Self> {
        let journal: Journal = match runtime.store().get(&scope, JOURNAL_FIELD).await? {
            Some(raw) => serde_json::from_value(raw)?,
            None => Journal::default(),
        };
        Ok(Self {
            runtime,
            scope,
            key,
            replayed: journal.writes.clone(),
            journal: Mutex::new(journal),
            write_seq: AtomicUsize::new(0),
            diverged: AtomicBool::new(false),
        })
    }

    /// Key of the running instance.
    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    /// Current wall-clock reading. Not memoized: wrap it in a step (or use
    /// [`WorkflowContext::timestamp`]) when the value must survive replay.
    pub fn now_ms(&self) -> u64 {
        self.runtime.clock().now_ms()
    }

    /// Snapshot of the replay journal.
    pub async fn journal(&self) -> Journal {
        self.journal.lock().await.clone()
    }

    /// Reads a state field.
    pub async fn get<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>> {
        check_user_field(field)?;
        read_field(&self.runtime, &self.scope, field).await
    }

    /// Writes a state field.
    ///
    /// On replay, a write identical to the one an earlier execution made at
    /// the same position is skipped. Once the body writes something else,
    /// replay has diverged and every later write is applied. Writing `null`
    /// clears the field.
    pub async fn set<T: Serialize + ?Sized>(&self, field: &str, value: &T) -> Result<()> {
        check_user_field(field)?;
        let value = match serde_json::to_value(value)? {
            Value::Null => None,
            value => Some(value),
        };
        self.journaled_write(JournalWrite {
            field: field.to_string(),
            value,
        })
        .await
    }

    /// Removes a state field, with the same replay rules as [`set`](Self::set).
    pub async fn clear(&self, field: &str) -> Result<()> {
        check_user_field(field)?;
        self.journaled_write(JournalWrite {
            field: field.to_string(),
            value: None,
        })
        .await
    }

    async fn journaled_write(&self, write: JournalWrite) -> Result<()> {
        let seq = self.write_seq.fetch_add(1, Ordering::SeqCst);
        if !self.diverged.load(Ordering::SeqCst) {
            match self.replayed.get(seq) {
                Some(earlier) if *earlier == write => {
                    tracing::trace!(scope = %self.scope, seq, field = %write.field, "Skipping replayed write");
                    return Ok(());
                }
                Some(earlier) => {
                    tracing::debug!(
                        scope = %self.scope,
                        seq,
                        journaled = %earlier.field,
                        field = %write.field,
                        "Replay diverged from journal"
                    );
                    self.diverged.store(true, Ordering::SeqCst);
                }
                None => {}
            }
        }

        let mut journal = self.journal.lock().await;
        let mut next = journal.clone();
        next.writes.truncate(seq);
        next.writes.push(write.clone());
        self.runtime
            .store()
            .apply(
                &self.scope,
                vec![
                    write.into_mutation(),
                    Mutation::set(JOURNAL_FIELD, serde_json::to_value(&next)?),
                ],
            )
            .await?;
        *journal = next;
        Ok(())
    }

    /// Runs `f` as the memoized step `name`.
    ///
    /// If the step already completed in an earlier execution, its stored
    /// result is returned and `f` is not called. A stored failure is
    /// returned as a terminal error with the original message and code.
    /// Store failures are not memoized: the step runs again on replay.
    pub async fn run<T, F, Fut>(&self, name: &str, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let field = step_field(name);
        let store = self.runtime.store();

        let record = match store.get(&self.scope, &field).await? {
            Some(raw) => {
                let record: StepRecord = serde_json::from_value(raw)?;
                match record.outcome() {
                    Some(Ok(value)) => {
                        tracing::debug!(scope = %self.scope, step = name, "Replaying memoized step");
                        return Ok(serde_json::from_value(value.clone())?);
                    }
                    Some(Err(failure)) => {
                        tracing::debug!(scope = %self.scope, step = name, "Replaying failed step");
                        return Err(failure.clone().into());
                    }
                    None => record.retried(),
                }
            }
            None => StepRecord::started(StepName::new(name)),
        };
        store
            .set(&self.scope, &field, serde_json::to_value(&record)?)
            .await?;

        tracing::debug!(scope = %self.scope, step = name, attempt = record.attempts, "Running step");
        match f().await {
            Ok(value) => {
                let json = serde_json::to_value(&value)?;
                self.complete_step(name, &field, record.succeed(json)).await?;
                Ok(value)
            }
            Err(err @ Error::Storage { .. }) => Err(err),
            Err(err) => {
                tracing::warn!(scope = %self.scope, step = name, error = %err, "Step failed");
                self.complete_step(name, &field, record.fail(&err)).await?;
                Err(err)
            }
        }
    }

    /// Runs `f` as a memoized step, retrying retryable failures according
    /// to `policy` before the outcome is recorded.
    pub async fn run_with_retry<T, F, Fut>(&self, name: &str, policy: &RetryPolicy, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let backoff = policy.backoff();
        let scope = &self.scope;
        self.run(name, move || {
            f.retry(backoff)
                .when(|e: &Error| e.is_retryable())
                .notify(move |e: &Error, delay: std::time::Duration| {
                    tracing::warn!(
                        scope = %scope,
                        step = name,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying step"
                    );
                })
        })
        .await
    }

    async fn complete_step(&self, name: &str, field: &str, record: StepRecord) -> Result<()> {
        let mut journal = self.journal.lock().await;
        let mut next = journal.clone();
        if !next.steps.iter().any(|s| s == name) {
            next.steps.push(name.to_string());
        }
        self.runtime
            .store()
            .apply(
                &self.scope,
                vec![
                    Mutation::set(field, serde_json::to_value(&record)?),
                    Mutation::set(JOURNAL_FIELD, serde_json::to_value(&next)?),
                ],
            )
            .await?;
        *journal = next;
        Ok(())
    }

    /// Reads the clock once and memoizes the reading as step `name`.
    pub async fn timestamp(&self, name: &str) -> Result<u64> {
        let now = self.now_ms();
        self.run(name, || async move { Ok(now) }).await
    }

    /// Handle to the durable promise `name` of this instance.
    pub fn promise<T>(&self, name: &str) -> DurablePromise<T>
    where
        T: Serialize + DeserializeOwned,
    {
        self.runtime.promise(self.scope.clone(), name)
    }
}

/// Concurrent, lock-free access to one workflow instance.
#[derive(Debug, Clone)]
pub struct SharedContext {
    runtime: DurableRuntime,
    scope: Scope,
}

impl SharedContext {
    pub(crate) fn new(runtime: DurableRuntime, scope: Scope) -> Self {
        Self { runtime, scope }
    }

    /// Instance key.
    pub fn key(&self) -> &str {
        self.scope.key()
    }

    /// Reads a state field.
    pub async fn get<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>> {
        check_user_field(field)?;
        read_field(&self.runtime, &self.scope, field).await
    }

    /// Handle to the durable promise `name` of this instance.
    pub fn promise<T>(&self, name: &str) -> DurablePromise<T>
    where
        T: Serialize + DeserializeOwned,
    {
        self.runtime.promise(self.scope.clone(), name)
    }

    /// Invocation record of the instance, if it was ever started.
    pub async fn invocation(&self) -> Result<Option<Invocation>> {
        self.runtime.load_invocation(&self.scope).await
    }
}

/// Exclusive access to one virtual object.
///
/// Holds the object's key lock until dropped; a second handler for the same
/// key waits, handlers for other keys proceed.
#[derive(Debug)]
pub struct ObjectContext {
    runtime: DurableRuntime,
    scope: Scope,
    _guard: KeyGuard,
}

impl ObjectContext {
    pub(crate) fn new(runtime: DurableRuntime, scope: Scope, guard: KeyGuard) -> Self {
        Self {
            runtime,
            scope,
            _guard: guard,
        }
    }

    /// Object key.
    pub fn key(&self) -> &str {
        self.scope.key()
    }

    /// Current wall-clock reading.
    pub fn now_ms(&self) -> u64 {
        self.runtime.clock().now_ms()
    }

    /// Reads a state field.
    pub async fn get<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>> {
        check_user_field(field)?;
        read_field(&self.runtime, &self.scope, field).await
    }

    /// Writes a state field.
    pub async fn set<T: Serialize + ?Sized>(&self, field: &str, value: &T) -> Result<()> {
        check_user_field(field)?;
        self.runtime
            .store()
            .set(&self.scope, field, serde_json::to_value(value)?)
            .await
    }

    /// Removes a state field.
    pub async fn clear(&self, field: &str) -> Result<()> {
        check_user_field(field)?;
        self.runtime.store().clear(&self.scope, field).await
    }

    /// Removes every field of this object.
    pub async fn clear_all(&self) -> Result<()> {
        self.runtime.store().clear_scope(&self.scope).await
    }
}

async fn read_field<T: DeserializeOwned>(
    runtime: &DurableRuntime,
    scope: &Scope,
    field: &str,
) -> Result<Option<T>> {
    match runtime.store().get(scope, field).await? {
        Some(Value::Null) | None => Ok(None),
        Some(raw) => Ok(Some(serde_json::from_value(raw)?)),
    }
}
