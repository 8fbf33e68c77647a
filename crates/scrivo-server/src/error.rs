//! Server errors and their HTTP rendering.

use std::path::PathBuf;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Result type alias for server setup.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while configuring and starting the service.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A file could not be read.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Workflow or state store failure.
    #[error(transparent)]
    Core(#[from] scrivo_core::Error),

    /// Outbound client setup failure.
    #[error(transparent)]
    Gateway(#[from] scrivo_gateway::Error),
}

impl Error {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}

/// Error returned by HTTP handlers.
///
/// Rendered as `{"error": {"category": ..., "message": ...}}` with a status
/// derived from the error's classification.
#[derive(Debug)]
pub struct ApiError(scrivo_core::Error);

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            err if err.is_rate_limited() => StatusCode::TOO_MANY_REQUESTS,
            scrivo_core::Error::Validation { .. } | scrivo_core::Error::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            scrivo_core::Error::Terminal { .. }
            | scrivo_core::Error::CallbackTimeout { .. }
            | scrivo_core::Error::CallbackRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            scrivo_core::Error::Upstream { .. } => StatusCode::BAD_GATEWAY,
            scrivo_core::Error::Storage { .. } | scrivo_core::Error::Io(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable category for this error.
    pub fn category(&self) -> &'static str {
        match &self.0 {
            err if err.is_rate_limited() => "rate_limited",
            scrivo_core::Error::Validation { .. } | scrivo_core::Error::Serialization(_) => {
                "invalid_request"
            }
            scrivo_core::Error::Terminal { .. }
            | scrivo_core::Error::CallbackTimeout { .. }
            | scrivo_core::Error::CallbackRejected { .. } => "terminal",
            scrivo_core::Error::Upstream { .. } => "upstream",
            scrivo_core::Error::Storage { .. } | scrivo_core::Error::Io(_) => "unavailable",
            _ => "internal",
        }
    }
}

impl From<scrivo_core::Error> for ApiError {
    fn from(err: scrivo_core::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self.0, status = status.as_u16(), "Request rejected");
        }
        let body = json!({
            "error": {
                "category": self.category(),
                "message": self.0.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}
