//! Durable state storage.
//!
//! State is addressed by a [`Scope`] (service name + instance or actor key)
//! and a field name. Values are JSON documents. Every write is persisted
//! before the call returns, so anything a handler observes after a write is
//! already durable.

mod memory;
mod redb;

pub use self::memory::InMemoryStateStore;
pub use self::redb::RedbStateStore;

use async_trait::async_trait;
use scrivo_core::types::KEY_SEPARATOR;
use scrivo_core::{Error, Result};
use serde_json::Value;
use std::fmt;

/// Address of one workflow instance or one virtual object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope {
    service: String,
    key: String,
}

impl Scope {
    /// Creates a scope, rejecting empty parts and parts containing the
    /// store separator.
    pub fn new(service: impl Into<String>, key: impl Into<String>) -> Result<Self> {
        let service = service.into();
        let key = key.into();
        for (field, value) in [("service", &service), ("key", &key)] {
            if value.is_empty() {
                return Err(Error::validation_field(field, "must not be empty"));
            }
            if value.contains(KEY_SEPARATOR) {
                return Err(Error::validation_field(
                    field,
                    "must not contain the unit separator character",
                ));
            }
        }
        Ok(Self { service, key })
    }

    /// Service (workflow or object type) name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Instance or actor key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.key)
    }
}

/// One write in an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Store `value` under `field`.
    Set {
        /// Field name
        field: String,
        /// New value
        value: Value,
    },
    /// Remove `field`.
    Clear {
        /// Field name
        field: String,
    },
}

impl Mutation {
    /// Creates a set mutation.
    pub fn set(field: impl Into<String>, value: Value) -> Self {
        Mutation::Set {
            field: field.into(),
            value,
        }
    }

    /// Creates a clear mutation.
    pub fn clear(field: impl Into<String>) -> Self {
        Mutation::Clear {
            field: field.into(),
        }
    }
}

/// Key-value persistence for durable state.
///
/// Implementations must make `apply` and `insert_if_absent` atomic: a
/// concurrent reader sees either none or all of a batch, and of two racing
/// `insert_if_absent` calls exactly one returns `true`.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the latest persisted value of `field`, if any.
    async fn get(&self, scope: &Scope, field: &str) -> Result<Option<Value>>;

    /// Applies a batch of writes atomically.
    async fn apply(&self, scope: &Scope, mutations: Vec<Mutation>) -> Result<()>;

    /// Stores `value` only if `field` has no value yet. Returns whether the
    /// value was stored.
    async fn insert_if_absent(&self, scope: &Scope, field: &str, value: Value) -> Result<bool>;

    /// Lists the fields stored for `scope`, sorted.
    async fn fields(&self, scope: &Scope) -> Result<Vec<String>>;

    /// Lists the keys that have any state under `service`, sorted.
    async fn keys(&self, service: &str) -> Result<Vec<String>>;

    /// Removes every field of `scope`.
    async fn clear_scope(&self, scope: &Scope) -> Result<()>;

    /// Stores `value` under `field`.
    async fn set(&self, scope: &Scope, field: &str, value: Value) -> Result<()> {
        self.apply(scope, vec![Mutation::set(field, value)]).await
    }

    /// Removes `field`.
    async fn clear(&self, scope: &Scope, field: &str) -> Result<()> {
        self.apply(scope, vec![Mutation::clear(field)]).await
    }
}
