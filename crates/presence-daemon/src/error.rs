//! Daemon error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use presence_core::PresenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    /// Client sent a malformed or incomplete request; nothing was mutated.
    #[error("{0}")]
    Validation(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Push to a single WebSocket connection failed.
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PresenceError> for DaemonError {
    fn from(err: PresenceError) -> Self {
        match err {
            PresenceError::Validation(msg) => Self::Validation(msg),
        }
    }
}

impl DaemonError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) | Self::Json(_) | Self::Transport(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for DaemonError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
