//! Supabase Storage client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{StorageGateway, StoredFile};
use crate::error::{check_status, Error, Result};

/// Page size used when listing a folder.
const LIST_PAGE_SIZE: usize = 1000;

/// Connection settings for Supabase Storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub url: String,

    /// Service-role key used for both `apikey` and bearer auth
    pub service_role_key: String,

    /// Bucket holding uploaded audio
    pub bucket: String,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    name: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

/// Storage gateway backed by the Supabase Storage REST API.
#[derive(Debug, Clone)]
pub struct SupabaseStorage {
    client: reqwest::Client,
    config: SupabaseConfig,
}

impl SupabaseStorage {
    /// Creates a client for `config`.
    pub fn new(client: reqwest::Client, config: SupabaseConfig) -> Result<Self> {
        if config.url.is_empty() {
            return Err(Error::Config("supabase url must be set".to_string()));
        }
        if config.bucket.is_empty() {
            return Err(Error::Config("supabase bucket must be set".to_string()));
        }
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/{path}",
            self.config.url.trim_end_matches('/')
        )
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.config.service_role_key)
            .header("apikey", &self.config.service_role_key)
    }

    async fn list_folder(&self, prefix: &str) -> Result<Vec<ListEntry>> {
        let mut entries = Vec::new();
        let mut offset = 0;
        loop {
            let body = json!({
                "prefix": prefix,
                "limit": LIST_PAGE_SIZE,
                "offset": offset,
                "sortBy": { "column": "name", "order": "asc" },
            });
            let response = self
                .authed(
                    self.client
                        .post(self.endpoint(&format!("object/list/{}", self.config.bucket))),
                )
                .json(&body)
                .send()
                .await?;
            let page: Vec<ListEntry> = check_status(response)
                .await?
                .json()
                .await
                .map_err(|e| Error::invalid(format!("failed to parse list response: {e}")))?;

            let full = page.len() == LIST_PAGE_SIZE;
            offset += page.len();
            entries.extend(page);
            if !full {
                return Ok(entries);
            }
        }
    }
}

#[async_trait]
impl StorageGateway for SupabaseStorage {
    async fn create_signed_url(&self, file_id: &str, ttl_secs: u64) -> Result<String> {
        let response = self
            .authed(self.client.post(self.endpoint(&format!(
                "object/sign/{}/{file_id}",
                self.config.bucket
            ))))
            .json(&json!({ "expiresIn": ttl_secs }))
            .send()
            .await?;
        let signed: SignResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::invalid(format!("failed to parse sign response: {e}")))?;

        if signed.signed_url.starts_with("http://") || signed.signed_url.starts_with("https://") {
            return Ok(signed.signed_url);
        }
        let path = signed.signed_url.trim_start_matches('/');
        Ok(self.endpoint(path))
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        let response = self
            .authed(
                self.client
                    .delete(self.endpoint(&format!("object/{}", self.config.bucket))),
            )
            .json(&json!({ "prefixes": [file_id] }))
            .send()
            .await?;
        check_status(response).await?;
        tracing::debug!(file_id, "Deleted object");
        Ok(())
    }

    async fn list_files(&self) -> Result<Vec<StoredFile>> {
        let mut files = Vec::new();
        let mut folders = vec![String::new()];

        while let Some(prefix) = folders.pop() {
            for entry in self.list_folder(&prefix).await? {
                let path = if prefix.is_empty() {
                    entry.name
                } else {
                    format!("{prefix}/{}", entry.name)
                };
                // Folders are listed without an id.
                if entry.id.is_none() {
                    folders.push(path);
                } else {
                    files.push(StoredFile {
                        name: path,
                        created_at: entry.created_at,
                    });
                }
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}
