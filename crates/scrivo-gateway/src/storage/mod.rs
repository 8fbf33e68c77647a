//! Object storage for uploaded audio.

mod memory;
mod supabase;

pub use memory::InMemoryStorage;
pub use supabase::{SupabaseConfig, SupabaseStorage};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One object in the audio bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    /// Full object path within the bucket
    pub name: String,

    /// Upload time, when the service reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Access to the bucket holding uploaded audio.
///
/// Deletion is idempotent: deleting a missing object succeeds.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Returns a URL granting read access to `file_id` for `ttl_secs`.
    async fn create_signed_url(&self, file_id: &str, ttl_secs: u64) -> Result<String>;

    /// Deletes `file_id`.
    async fn delete_file(&self, file_id: &str) -> Result<()>;

    /// Lists every object in the bucket, including those in folders.
    async fn list_files(&self) -> Result<Vec<StoredFile>>;
}
