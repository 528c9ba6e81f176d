//! Ferry server: axum receiver for GitHub webhook deliveries.
//!
//! `POST /webhook` verifies the signature (when a secret is configured),
//! classifies the event, hands it to a `DeliveryHandler` and answers 200 when
//! everything reconciled, 500 otherwise. `GET /healthz` answers `ok`.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use metrics::counter;
use tracing::{debug, info, warn};

use ferry_api::{DeliveryHandler, Disposition};

pub mod error;
pub mod payload;
pub mod signature;

pub use error::WebhookError;

pub const EVENT_HEADER: &str = "x-github-event";
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const DELIVERY_HEADER: &str = "x-github-delivery";

/// GitHub caps webhook payloads at 25 MB.
pub const MAX_PAYLOAD_BYTES: usize = 25 * 1024 * 1024;

pub struct WebhookState {
    pub handler: Arc<dyn DeliveryHandler>,
    /// Unset disables signature verification.
    pub secret: Option<Vec<u8>>,
    pub delivery_timeout: Duration,
}

impl WebhookState {
    pub fn new(handler: Arc<dyn DeliveryHandler>, secret: Option<String>, delivery_timeout: Duration) -> Self {
        let secret = secret.filter(|s| !s.is_empty()).map(String::into_bytes);
        if secret.is_none() {
            warn!("no webhook secret configured; signatures are not verified");
        }
        Self { handler, secret, delivery_timeout }
    }
}

pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_BYTES))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn webhook(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, WebhookError> {
    let delivery = header(&headers, DELIVERY_HEADER).unwrap_or("-").to_string();
    let res = receive(&state, &headers, &body).await;
    match &res {
        Ok(_) => info!(delivery = %delivery, "delivery handled"),
        Err(e) => {
            counter!("ferry_webhook_rejected_total", 1u64, "reason" => e.reason());
            warn!(delivery = %delivery, error = %e, "delivery failed");
        }
    }
    res
}

async fn receive(state: &WebhookState, headers: &HeaderMap, body: &[u8]) -> Result<&'static str, WebhookError> {
    if let Some(secret) = &state.secret {
        signature::verify(secret, header(headers, SIGNATURE_HEADER), body)?;
    }
    let event = header(headers, EVENT_HEADER).ok_or(WebhookError::MissingEvent)?;
    debug!(event, size = body.len(), "delivery received");
    let parsed = payload::parse_event(event, body)?;
    let disposition = tokio::time::timeout(state.delivery_timeout, state.handler.dispatch(parsed))
        .await
        .map_err(|_| WebhookError::Timeout(state.delivery_timeout))?;
    match disposition {
        Disposition::Acknowledged => Ok("ok"),
        Disposition::Reconciled(report) if report.is_success() => Ok("ok"),
        Disposition::Reconciled(report) => {
            Err(WebhookError::Failed { failures: report.failures(), total: report.manifests.len() })
        }
        Disposition::Rejected(reason) => Err(WebhookError::Rejected(reason)),
    }
}
