//! Error types for Scrivo core library.

/// HTTP-style code carried by rate-limit rejections.
pub const RATE_LIMITED_CODE: u16 = 429;

/// Message carried by rate-limit rejections.
pub const RATE_LIMITED_MESSAGE: &str = "rate limit exceeded";

/// Errors that can occur while running durable workflows and actors.
///
/// All error variants are marked with `#[non_exhaustive]` to allow
/// adding new error types without breaking changes.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Non-retryable failure. Callers must not retry the same operation.
    #[error("{message}")]
    Terminal {
        /// Human-readable error message
        message: String,
        /// Optional status code (429 for rate-limit rejections)
        code: Option<u16>,
    },

    /// An external collaborator (object storage, STT provider) failed.
    #[error("{message}")]
    Upstream {
        /// Human-readable error message
        message: String,
        /// Whether the underlying request may succeed if repeated
        retryable: bool,
    },

    /// The durable state store could not be read or written.
    #[error("State store error: {message}")]
    Storage {
        /// What went wrong
        message: String,
    },

    /// I/O error (file operations, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Input validation error
    #[error("Validation error: {message}")]
    Validation {
        /// Field or aspect that failed validation
        field: Option<String>,
        /// What went wrong
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// What configuration is problematic
        message: String,
    },

    /// The provider did not call back before the instance's deadline.
    #[error("timed out waiting for provider callback after {seconds}s")]
    CallbackTimeout {
        /// Configured timeout in seconds
        seconds: u64,
    },

    /// The provider reported that the transcription failed.
    #[error("provider rejected transcription: {message}")]
    CallbackRejected {
        /// Reason reported in the callback
        message: String,
    },
}

/// Convenience `Result` type alias for Scrivo operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns whether this error is retryable.
    ///
    /// Retryable errors are transient: store hiccups, I/O, and upstream
    /// failures that the collaborator marked as transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Upstream { retryable, .. } => *retryable,
            Error::Storage { .. } => true,
            Error::Io(_) => true,
            Error::Terminal { .. } => false,
            Error::Serialization(_) => false,
            Error::Validation { .. } => false,
            Error::Config { .. } => false,
            Error::CallbackTimeout { .. } => false,
            Error::CallbackRejected { .. } => false,
        }
    }

    /// Returns whether this error ends a workflow invocation for good.
    ///
    /// Non-retryable errors are terminal, except for store-level failures:
    /// those mean the outcome could not be recorded at all.
    pub fn is_terminal(&self) -> bool {
        !self.is_retryable()
    }

    /// Returns `true` for rate-limit rejections.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Error::Terminal {
                code: Some(RATE_LIMITED_CODE),
                ..
            }
        )
    }

    /// Returns the status code attached to a terminal error, if any.
    pub fn code(&self) -> Option<u16> {
        match self {
            Error::Terminal { code, .. } => *code,
            _ => None,
        }
    }

    /// Creates a new terminal error.
    pub fn terminal<S: Into<String>>(message: S) -> Self {
        Error::Terminal {
            message: message.into(),
            code: None,
        }
    }

    /// Creates a new terminal error with a status code.
    pub fn terminal_with_code<S: Into<String>>(code: u16, message: S) -> Self {
        Error::Terminal {
            message: message.into(),
            code: Some(code),
        }
    }

    /// Creates the rate-limit rejection.
    pub fn rate_limited() -> Self {
        Self::terminal_with_code(RATE_LIMITED_CODE, RATE_LIMITED_MESSAGE)
    }

    /// Creates a new upstream error.
    pub fn upstream<S: Into<String>>(message: S, retryable: bool) -> Self {
        Error::Upstream {
            message: message.into(),
            retryable,
        }
    }

    /// Creates a new state store error.
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Error::Storage {
            message: message.into(),
        }
    }

    /// Creates a new validation error.
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Error::Validation {
            field: None,
            message: message.into(),
        }
    }

    /// Creates a new validation error with a field name.
    pub fn validation_field<F, M>(field: F, message: M) -> Self
    where
        F: Into<String>,
        M: Into<String>,
    {
        Error::Validation {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Error::Config {
            message: message.into(),
        }
    }
}
