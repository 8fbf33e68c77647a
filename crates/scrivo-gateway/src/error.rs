//! Error types for outbound gateway calls.

use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by storage and provider clients.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The request never produced a response (connect, timeout, TLS...).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("{status} - {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, as text
        body: String,
    },

    /// The service answered with a body we could not use.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The provider does not support the requested operation.
    #[error("not supported by {provider}: {operation}")]
    Unsupported {
        /// Provider name
        provider: String,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Client misconfiguration (bad base URL, missing key).
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns whether repeating the request may succeed.
    ///
    /// Rate limiting (429), server errors (5xx) and transport failures are
    /// retryable; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => !e.is_decode() && !e.is_builder(),
            Error::Status { status, .. } => is_retryable_status(*status),
            Error::InvalidResponse(_) | Error::Unsupported { .. } | Error::Config(_) => false,
        }
    }

    pub(crate) fn invalid(what: impl std::fmt::Display) -> Self {
        Error::InvalidResponse(what.to_string())
    }
}

/// Returns `true` for statuses worth retrying.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

impl From<Error> for scrivo_core::Error {
    fn from(err: Error) -> Self {
        let retryable = err.is_retryable();
        scrivo_core::Error::upstream(err.to_string(), retryable)
    }
}

/// Turns a non-success response into [`Error::Status`].
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Status {
        status: status.as_u16(),
        body,
    })
}
