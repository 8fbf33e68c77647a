//! Memoized step outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::StepName;
use crate::Error;

static NULL: Value = Value::Null;

/// Serializable form of a step failure.
///
/// Failures are stored so that a replay re-raises the same error instead of
/// running the step body again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Rendered error message
    pub message: String,

    /// Status code of terminal errors, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

impl From<&Error> for FailureRecord {
    fn from(err: &Error) -> Self {
        Self {
            message: err.to_string(),
            code: err.code(),
        }
    }
}

impl From<FailureRecord> for Error {
    fn from(record: FailureRecord) -> Self {
        Error::Terminal {
            message: record.message,
            code: record.code,
        }
    }
}

/// Durable record of one step of one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    /// Step this record belongs to
    pub name: StepName,

    /// Whether the outcome below is final
    pub completed: bool,

    /// Memoized result, present when the step succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Memoized failure, present when the step failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureRecord>,

    /// Number of times the body was invoked (1-indexed)
    pub attempts: u32,

    /// When the first attempt started
    pub started_at: DateTime<Utc>,

    /// When the outcome was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    /// Creates the record for a first attempt.
    pub fn started(name: StepName) -> Self {
        Self {
            name,
            completed: false,
            result: None,
            error: None,
            attempts: 1,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Records another attempt after an interrupted one.
    pub fn retried(mut self) -> Self {
        self.attempts += 1;
        self
    }

    /// Marks the step as succeeded with `result`.
    pub fn succeed(mut self, result: Value) -> Self {
        self.completed = true;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(Utc::now());
        self
    }

    /// Marks the step as failed with `error`.
    pub fn fail(mut self, error: &Error) -> Self {
        self.completed = true;
        self.result = None;
        self.error = Some(FailureRecord::from(error));
        self.completed_at = Some(Utc::now());
        self
    }

    /// Returns the memoized outcome if the step completed.
    pub fn outcome(&self) -> Option<std::result::Result<&Value, &FailureRecord>> {
        if !self.completed {
            return None;
        }
        match (&self.result, &self.error) {
            (_, Some(failure)) => Some(Err(failure)),
            (Some(value), None) => Some(Ok(value)),
            (None, None) => Some(Ok(&NULL)),
        }
    }

    /// Returns how long the step took, if it completed.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at
            .map(|end| end.signed_duration_since(self.started_at))
    }
}
