//! In-memory storage double.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{StorageGateway, StoredFile};
use crate::error::{Error, Result};

/// Storage gateway keeping objects in a map.
///
/// Counts calls and can be told to fail signing or deleting, for exercising
/// workflow error paths in tests.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    files: Mutex<BTreeMap<String, StoredFile>>,
    sign_failure: Mutex<Option<Error>>,
    delete_failure: Mutex<Option<(u16, String)>>,
    sign_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    deleted: Mutex<Vec<String>>,
}

impl InMemoryStorage {
    /// Creates an empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an object uploaded at `created_at`.
    pub fn insert(&self, name: impl Into<String>, created_at: Option<DateTime<Utc>>) {
        let name = name.into();
        self.lock_files().insert(
            name.clone(),
            StoredFile { name, created_at },
        );
    }

    /// Makes the next signing call fail with `error`.
    pub fn fail_next_sign(&self, error: Error) {
        *self.sign_failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(error);
    }

    /// Makes every deletion fail with `status` until cleared.
    pub fn fail_deletes(&self, status: u16, body: impl Into<String>) {
        *self.delete_failure.lock().unwrap_or_else(|e| e.into_inner()) =
            Some((status, body.into()));
    }

    /// Returns whether `name` is still stored.
    pub fn contains(&self, name: &str) -> bool {
        self.lock_files().contains_key(name)
    }

    /// Number of signing calls so far.
    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }

    /// Number of deletion calls so far, failed ones included.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Names passed to successful deletions, in call order.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn lock_files(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredFile>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StorageGateway for InMemoryStorage {
    async fn create_signed_url(&self, file_id: &str, ttl_secs: u64) -> Result<String> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self
            .sign_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            return Err(err);
        }
        if !self.contains(file_id) {
            return Err(Error::Status {
                status: 404,
                body: format!("object not found: {file_id}"),
            });
        }
        Ok(format!("memory://{file_id}?expiresIn={ttl_secs}"))
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((status, body)) = self
            .delete_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Err(Error::Status { status, body });
        }
        self.lock_files().remove(file_id);
        self.deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(file_id.to_string());
        Ok(())
    }

    async fn list_files(&self) -> Result<Vec<StoredFile>> {
        Ok(self.lock_files().values().cloned().collect())
    }
}
