//! Durable promises.
//!
//! A promise is a named, write-once slot in a workflow instance's state. A
//! workflow awaits it; shared handlers resolve or reject it. The first
//! resolution wins and later ones are ignored, which makes late or
//! duplicate callbacks harmless.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scrivo_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::debug;

use crate::store::{Scope, StateStore};

const PROMISE_PREFIX: &str = "$promise:";

pub(crate) fn promise_field(name: &str) -> String {
    format!("{PROMISE_PREFIX}{name}")
}

/// Persisted settlement of a promise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum PromiseRecord {
    /// Settled with a value.
    Resolved {
        /// JSON form of the value
        value: Value,
    },

    /// Settled with a failure.
    Rejected {
        /// Reason given by the rejecting party
        message: String,
    },
}

impl PromiseRecord {
    /// Converts the settlement into the awaiting side's result.
    ///
    /// Rejections surface as terminal errors carrying the rejection message.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            PromiseRecord::Resolved { value } => Ok(serde_json::from_value(value)?),
            PromiseRecord::Rejected { message } => Err(Error::terminal(message)),
        }
    }
}

/// In-process wakeups for promise awaiters.
///
/// Purely an optimization: awaiters also poll the store, so resolutions
/// written by another process are still observed.
#[derive(Debug, Default, Clone)]
pub(crate) struct PromiseWaiters {
    slots: Arc<Mutex<HashMap<(Scope, String), Arc<Notify>>>>,
}

impl PromiseWaiters {
    fn subscribe<'a>(&'a self, scope: &'a Scope, name: &'a str) -> WaitSlot<'a> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let notify = Arc::clone(
            slots
                .entry((scope.clone(), name.to_string()))
                .or_default(),
        );
        WaitSlot {
            waiters: self,
            scope,
            name,
            notify,
        }
    }

    fn wake(&self, scope: &Scope, name: &str) {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.remove(&(scope.clone(), name.to_string()))
        };
        if let Some(notify) = slot {
            notify.notify_waiters();
        }
    }

    fn forget(&self, scope: &Scope, name: &str, notify: &Arc<Notify>) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let key = (scope.clone(), name.to_string());
        if let Some(current) = slots.get(&key)
            && Arc::ptr_eq(current, notify)
            && Arc::strong_count(notify) <= 2
        {
            slots.remove(&key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// One awaiter's subscription. Dropping it releases the registry entry
/// once no other awaiter shares it, including when the awaiting future is
/// cancelled.
struct WaitSlot<'a> {
    waiters: &'a PromiseWaiters,
    scope: &'a Scope,
    name: &'a str,
    notify: Arc<Notify>,
}

impl Drop for WaitSlot<'_> {
    fn drop(&mut self) {
        self.waiters.forget(self.scope, self.name, &self.notify);
    }
}

/// Handle to one named promise of one workflow instance.
pub struct DurablePromise<T> {
    scope: Scope,
    name: String,
    store: Arc<dyn StateStore>,
    waiters: PromiseWaiters,
    poll_interval: Duration,
    _value: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for DurablePromise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurablePromise")
            .field("scope", &self.scope)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<T> DurablePromise<T>
where
    T: Serialize + DeserializeOwned,
{
    pub(crate) fn new(
        scope: Scope,
        name: impl Into<String>,
        store: Arc<dyn StateStore>,
        waiters: PromiseWaiters,
        poll_interval: Duration,
    ) -> Self {
        Self {
            scope,
            name: name.into(),
            store,
            waiters,
            poll_interval,
            _value: PhantomData,
        }
    }

    /// Name of this promise.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the persisted settlement, if any.
    pub async fn record(&self) -> Result<Option<PromiseRecord>> {
        match self.store.get(&self.scope, &promise_field(&self.name)).await? {
            Some(raw) => Ok(Some(serde_json::from_value(raw)?)),
            None => Ok(None),
        }
    }

    /// Returns the outcome without waiting, or `None` while unsettled.
    pub async fn peek(&self) -> Result<Option<Result<T>>> {
        Ok(self.record().await?.map(PromiseRecord::into_result))
    }

    /// Returns `true` once the promise is settled either way.
    pub async fn is_settled(&self) -> Result<bool> {
        Ok(self.record().await?.is_some())
    }

    /// Resolves the promise with `value`. Returns `false` if it was already
    /// settled, in which case nothing changes.
    pub async fn resolve(&self, value: &T) -> Result<bool> {
        let record = PromiseRecord::Resolved {
            value: serde_json::to_value(value)?,
        };
        self.settle(record).await
    }

    /// Rejects the promise. Returns `false` if it was already settled.
    pub async fn reject(&self, message: impl Into<String>) -> Result<bool> {
        let record = PromiseRecord::Rejected {
            message: message.into(),
        };
        self.settle(record).await
    }

    async fn settle(&self, record: PromiseRecord) -> Result<bool> {
        let won = self
            .store
            .insert_if_absent(
                &self.scope,
                &promise_field(&self.name),
                serde_json::to_value(&record)?,
            )
            .await?;
        if won {
            debug!(scope = %self.scope, promise = %self.name, "Promise settled");
            self.waiters.wake(&self.scope, &self.name);
        } else {
            debug!(scope = %self.scope, promise = %self.name, "Promise already settled, ignoring");
        }
        Ok(won)
    }

    /// Waits until the promise is settled and returns its value.
    ///
    /// A rejection is returned as a terminal error with the rejection
    /// message. Awaiting an already-settled promise returns immediately, so
    /// replays see the same outcome.
    pub async fn result(&self) -> Result<T> {
        loop {
            let slot = self.waiters.subscribe(&self.scope, &self.name);
            let notified = slot.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(record) = self.record().await? {
                return record.into_result();
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
