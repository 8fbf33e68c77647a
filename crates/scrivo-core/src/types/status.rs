//! Pipeline status tracking types.

use serde::{Deserialize, Serialize};

/// The observable state of a transcription job.
///
/// `Queued` is the implicit state of an instance that has not persisted
/// anything yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    /// Job accepted, no external call made yet.
    #[default]
    Queued,

    /// Admitted by the rate limiter; the provider is (or will be) working.
    Transcribing,

    /// Transcript stored.
    Done,

    /// Job failed; see the accompanying error message.
    Error,
}

impl PipelineStatus {
    /// Returns `true` if the job reached a terminal state (Done or Error).
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStatus::Done | PipelineStatus::Error)
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStatus::Queued => write!(f, "QUEUED"),
            PipelineStatus::Transcribing => write!(f, "TRANSCRIBING"),
            PipelineStatus::Done => write!(f, "DONE"),
            PipelineStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Read-only view of a job returned to polling clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Current status
    pub status: PipelineStatus,

    /// Transcript text, once the job is done
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,

    /// Failure message, once the job errored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Provider handling the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Provider-side request identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_request_id: Option<String>,
}
