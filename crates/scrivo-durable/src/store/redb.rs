//! File-backed state store on top of redb.
//!
//! All state lives in a single table keyed by
//! `service \x1f key \x1f field`, so a scope (or a whole service) is a
//! contiguous key range.

use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use scrivo_core::types::KEY_SEPARATOR;
use scrivo_core::{Error, Result};
use serde_json::Value;
use tracing::debug;

use super::{Mutation, Scope, StateStore};

const STATE: TableDefinition<&str, &[u8]> = TableDefinition::new("scrivo_state");

/// The character sorting right after [`KEY_SEPARATOR`]; closes prefix ranges.
const RANGE_END: char = '\u{20}';

fn storage_err<E: Display>(e: E) -> Error {
    Error::storage(e.to_string())
}

fn scope_prefix(scope: &Scope) -> String {
    format!(
        "{}{KEY_SEPARATOR}{}{KEY_SEPARATOR}",
        scope.service(),
        scope.key()
    )
}

fn scope_range(scope: &Scope) -> (String, String) {
    let start = scope_prefix(scope);
    let end = format!("{}{KEY_SEPARATOR}{}{RANGE_END}", scope.service(), scope.key());
    (start, end)
}

fn record_key(scope: &Scope, field: &str) -> String {
    format!("{}{field}", scope_prefix(scope))
}

/// State store persisted in a redb database file.
///
/// Every batch is one write transaction, committed before the call returns.
/// Blocking database work runs on the tokio blocking pool.
#[derive(Clone)]
pub struct RedbStateStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStateStore").finish_non_exhaustive()
    }
}

impl RedbStateStore {
    /// Opens (or creates) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(storage_err)?;

        let txn = db.begin_write().map_err(storage_err)?;
        {
            txn.open_table(STATE).map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;

        debug!(path = %path.display(), "Opened state database");
        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(storage_err)?
    }

    fn scan(db: &Database, start: &str, end: &str) -> Result<Vec<String>> {
        let txn = db.begin_read().map_err(storage_err)?;
        let table = txn.open_table(STATE).map_err(storage_err)?;
        let mut keys = Vec::new();
        for entry in table.range(start..end).map_err(storage_err)? {
            let (key, _) = entry.map_err(storage_err)?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }
}

#[async_trait]
impl StateStore for RedbStateStore {
    async fn get(&self, scope: &Scope, field: &str) -> Result<Option<Value>> {
        let key = record_key(scope, field);
        self.blocking(move |db| {
            let txn = db.begin_read().map_err(storage_err)?;
            let table = txn.open_table(STATE).map_err(storage_err)?;
            match table.get(key.as_str()).map_err(storage_err)? {
                Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn apply(&self, scope: &Scope, mutations: Vec<Mutation>) -> Result<()> {
        let mut encoded = Vec::with_capacity(mutations.len());
        for mutation in mutations {
            match mutation {
                Mutation::Set { field, value } => {
                    encoded.push((record_key(scope, &field), Some(serde_json::to_vec(&value)?)));
                }
                Mutation::Clear { field } => encoded.push((record_key(scope, &field), None)),
            }
        }

        self.blocking(move |db| {
            let txn = db.begin_write().map_err(storage_err)?;
            {
                let mut table = txn.open_table(STATE).map_err(storage_err)?;
                for (key, value) in &encoded {
                    match value {
                        Some(bytes) => {
                            table
                                .insert(key.as_str(), bytes.as_slice())
                                .map_err(storage_err)?;
                        }
                        None => {
                            table.remove(key.as_str()).map_err(storage_err)?;
                        }
                    }
                }
            }
            txn.commit().map_err(storage_err)
        })
        .await
    }

    async fn insert_if_absent(&self, scope: &Scope, field: &str, value: Value) -> Result<bool> {
        let key = record_key(scope, field);
        let bytes = serde_json::to_vec(&value)?;
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(storage_err)?;
            let inserted = {
                let mut table = txn.open_table(STATE).map_err(storage_err)?;
                let exists = table.get(key.as_str()).map_err(storage_err)?.is_some();
                if !exists {
                    table
                        .insert(key.as_str(), bytes.as_slice())
                        .map_err(storage_err)?;
                }
                !exists
            };
            txn.commit().map_err(storage_err)?;
            Ok(inserted)
        })
        .await
    }

    async fn fields(&self, scope: &Scope) -> Result<Vec<String>> {
        let (start, end) = scope_range(scope);
        let prefix_len = start.len();
        self.blocking(move |db| {
            let keys = Self::scan(db, &start, &end)?;
            Ok(keys.into_iter().map(|k| k[prefix_len..].to_string()).collect())
        })
        .await
    }

    async fn keys(&self, service: &str) -> Result<Vec<String>> {
        let start = format!("{service}{KEY_SEPARATOR}");
        let end = format!("{service}{RANGE_END}");
        self.blocking(move |db| {
            let mut keys: Vec<String> = Self::scan(db, &start, &end)?
                .into_iter()
                .filter_map(|k| k.split(KEY_SEPARATOR).nth(1).map(str::to_string))
                .collect();
            keys.dedup();
            Ok(keys)
        })
        .await
    }

    async fn clear_scope(&self, scope: &Scope) -> Result<()> {
        let (start, end) = scope_range(scope);
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(storage_err)?;
            {
                let mut table = txn.open_table(STATE).map_err(storage_err)?;
                let doomed: Vec<String> = {
                    let mut doomed = Vec::new();
                    for entry in table.range(start.as_str()..end.as_str()).map_err(storage_err)? {
                        let (key, _) = entry.map_err(storage_err)?;
                        doomed.push(key.value().to_string());
                    }
                    doomed
                };
                for key in &doomed {
                    table.remove(key.as_str()).map_err(storage_err)?;
                }
            }
            txn.commit().map_err(storage_err)
        })
        .await
    }
}
