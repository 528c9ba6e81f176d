//! Error type for webhook deliveries

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Why a delivery was not answered with 200.
///
/// GitHub only distinguishes success from failure, so every variant maps to
/// 500; the message is returned as the body for the delivery log.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("missing X-GitHub-Event header")]
    MissingEvent,

    #[error("signature verification failed: {0}")]
    Signature(String),

    #[error("malformed {event} payload: {reason}")]
    Malformed { event: String, reason: String },

    #[error("{0}")]
    Rejected(String),

    #[error("{failures} of {total} manifests failed")]
    Failed { failures: usize, total: usize },

    #[error("delivery not handled within {0:?}")]
    Timeout(Duration),
}

impl WebhookError {
    /// Metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            WebhookError::MissingEvent | WebhookError::Malformed { .. } => "malformed",
            WebhookError::Signature(_) => "signature",
            WebhookError::Rejected(_) => "unsupported",
            WebhookError::Failed { .. } => "manifest",
            WebhookError::Timeout(_) => "timeout",
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}
