//! Identifier types for workflow instances and steps.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{Error, Result};

/// Separator used by state stores to compose `service␟key␟field` keys.
///
/// Identifiers may not contain it.
pub const KEY_SEPARATOR: char = '\u{1f}';

/// Caller-supplied idempotency key identifying one workflow instance.
///
/// The same key always addresses the same instance, so re-submitting a job
/// with a key that already ran replays it instead of starting a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceKey(String);

impl InstanceKey {
    /// Creates an instance key, rejecting empty keys and keys containing
    /// the store separator.
    ///
    /// # Examples
    ///
    /// ```
    /// use scrivo_core::InstanceKey;
    ///
    /// let key = InstanceKey::new("job-42").unwrap();
    /// assert_eq!(key.as_str(), "job-42");
    /// assert!(InstanceKey::new("").is_err());
    /// ```
    pub fn new<S: Into<String>>(key: S) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::validation_field("key", "must not be empty"));
        }
        if key.contains(KEY_SEPARATOR) {
            return Err(Error::validation_field(
                "key",
                "must not contain the unit separator character",
            ));
        }
        Ok(Self(key))
    }

    /// Generates a fresh random key (UUID v4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for InstanceKey {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<InstanceKey> for String {
    fn from(key: InstanceKey) -> Self {
        key.0
    }
}

impl std::str::FromStr for InstanceKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for InstanceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Name of a durable step, unique within one workflow instance.
///
/// Step names are human-readable strings like "create-signed-url".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepName(String);

impl StepName {
    /// Creates a new step name from a string.
    ///
    /// # Examples
    ///
    /// ```
    /// use scrivo_core::StepName;
    ///
    /// let name = StepName::new("submit-transcription");
    /// assert_eq!(name.as_str(), "submit-transcription");
    /// ```
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    /// Returns the step name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
