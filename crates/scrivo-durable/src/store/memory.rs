//! In-process state store.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use scrivo_core::Result;
use serde_json::Value;

use super::{Mutation, Scope, StateStore};

type Fields = BTreeMap<String, Value>;

/// State store backed by a map held in memory.
///
/// Durable for the lifetime of the process. Used by tests and by
/// single-process deployments that accept losing state on restart.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    scopes: RwLock<BTreeMap<Scope, Fields>>,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&BTreeMap<Scope, Fields>) -> T) -> T {
        let guard = self.scopes.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut BTreeMap<Scope, Fields>) -> T) -> T {
        let mut guard = self.scopes.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, scope: &Scope, field: &str) -> Result<Option<Value>> {
        Ok(self.read(|scopes| scopes.get(scope).and_then(|f| f.get(field)).cloned()))
    }

    async fn apply(&self, scope: &Scope, mutations: Vec<Mutation>) -> Result<()> {
        self.write(|scopes| {
            let fields = scopes.entry(scope.clone()).or_default();
            for mutation in mutations {
                match mutation {
                    Mutation::Set { field, value } => {
                        fields.insert(field, value);
                    }
                    Mutation::Clear { field } => {
                        fields.remove(&field);
                    }
                }
            }
            if fields.is_empty() {
                scopes.remove(scope);
            }
        });
        Ok(())
    }

    async fn insert_if_absent(&self, scope: &Scope, field: &str, value: Value) -> Result<bool> {
        Ok(self.write(|scopes| {
            let fields = scopes.entry(scope.clone()).or_default();
            if fields.contains_key(field) {
                false
            } else {
                fields.insert(field.to_string(), value);
                true
            }
        }))
    }

    async fn fields(&self, scope: &Scope) -> Result<Vec<String>> {
        Ok(self.read(|scopes| {
            scopes
                .get(scope)
                .map(|f| f.keys().cloned().collect())
                .unwrap_or_default()
        }))
    }

    async fn keys(&self, service: &str) -> Result<Vec<String>> {
        Ok(self.read(|scopes| {
            scopes
                .keys()
                .filter(|s| s.service() == service)
                .map(|s| s.key().to_string())
                .collect()
        }))
    }

    async fn clear_scope(&self, scope: &Scope) -> Result<()> {
        self.write(|scopes| scopes.remove(scope));
        Ok(())
    }
}
