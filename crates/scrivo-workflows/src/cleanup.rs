//! Bulk sweep of stale uploads.
//!
//! Independent of workflow instances: deletes whatever in the bucket is
//! older than a cutoff, catching files whose job never ran its cleanup.

use chrono::{DateTime, Utc};
use scrivo_core::Result;
use scrivo_gateway::StorageGateway;
use serde::{Deserialize, Serialize};

/// Error messages kept in a [`CleanupReport`].
pub const MAX_REPORTED_ERRORS: usize = 10;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    /// Files deleted
    pub deleted_count: usize,

    /// Files whose deletion failed
    pub failed_count: usize,

    /// Files listed
    pub total_scanned: usize,

    /// First few deletion errors, as `"<file>: <error>"`
    pub errors: Vec<String>,

    /// More errors occurred than are listed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub errors_truncated: bool,
}

impl CleanupReport {
    fn record_failure(&mut self, message: String) {
        self.failed_count += 1;
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(message);
        } else {
            self.errors_truncated = true;
        }
    }
}

/// Deletes every file created before `now - max_age`.
///
/// Files without a creation time are left alone. A failed deletion is
/// counted and reported but does not stop the sweep; only a failure to
/// list the bucket is an error.
pub async fn sweep_older_than(
    storage: &dyn StorageGateway,
    max_age: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<CleanupReport> {
    let cutoff = now - max_age;
    let files = storage.list_files().await?;

    let mut report = CleanupReport {
        total_scanned: files.len(),
        ..CleanupReport::default()
    };

    for file in files {
        let Some(created_at) = file.created_at else {
            continue;
        };
        if created_at >= cutoff {
            continue;
        }
        match storage.delete_file(&file.name).await {
            Ok(()) => report.deleted_count += 1,
            Err(e) => {
                tracing::warn!(file = %file.name, error = %e, "Sweep failed to delete file");
                report.record_failure(format!("{}: {e}", file.name));
            }
        }
    }

    tracing::info!(
        cutoff = %cutoff,
        scanned = report.total_scanned,
        deleted = report.deleted_count,
        failed = report.failed_count,
        "Storage sweep finished"
    );
    Ok(report)
}
