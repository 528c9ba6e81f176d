//! Ferry API: webhook event dispatch and the per-delivery reconciliation flow.
//!
//! Frontends (the axum server, tests) depend on the `DeliveryHandler` trait;
//! `Orchestrator` is the in-process implementation composing change
//! extraction, content fetch, decoding, mapping and reconciliation.

#![forbid(unsafe_code)]

use std::time::Duration;

use serde::{Deserialize, Serialize};

use ferry_core::{PushDelivery, ReconcileAction, ReconcileOutcome};

pub mod orchestrator;

pub use orchestrator::Orchestrator;

/// Runtime knobs shared by the orchestrator and the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub default_namespace: String,
    pub fetch_timeout: Duration,
    pub discovery_timeout: Duration,
    pub apply_timeout: Duration,
    /// Bound on handling one whole delivery.
    pub delivery_timeout: Duration,
    /// Zero disables the discovery cache.
    pub discovery_cache_ttl: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_namespace: ferry_apply::DEFAULT_NAMESPACE.to_string(),
            fetch_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(10),
            apply_timeout: Duration::from_secs(10),
            delivery_timeout: Duration::from_secs(120),
            discovery_cache_ttl: Duration::ZERO,
        }
    }
}

/// A webhook delivery, classified by event kind.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Push(PushDelivery),
    /// Sent once when the hook is registered.
    Ping { hook_id: Option<u64> },
    Unsupported(String),
}

/// Which change category a path came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    pub fn action(self) -> ReconcileAction {
        match self {
            ChangeKind::Added | ChangeKind::Modified => ReconcileAction::Upsert,
            ChangeKind::Removed => ReconcileAction::Delete,
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Added => f.write_str("added"),
            ChangeKind::Modified => f.write_str("modified"),
            ChangeKind::Removed => f.write_str("removed"),
        }
    }
}

#[derive(Debug)]
pub struct ManifestReport {
    pub path: String,
    pub change: ChangeKind,
    pub outcome: ReconcileOutcome,
}

impl ManifestReport {
    pub fn action(&self) -> ReconcileAction {
        self.change.action()
    }
}

/// Per-manifest results of one push delivery, in processing order.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub manifests: Vec<ManifestReport>,
}

impl DeliveryReport {
    pub fn failures(&self) -> usize {
        self.manifests.iter().filter(|m| m.outcome.is_failure()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failures() == 0
    }

    pub fn get(&self, path: &str, change: ChangeKind) -> Option<&ReconcileOutcome> {
        self.manifests.iter().find(|m| m.path == path && m.change == change).map(|m| &m.outcome)
    }
}

/// What became of a delivery.
#[derive(Debug)]
pub enum Disposition {
    Reconciled(DeliveryReport),
    Acknowledged,
    Rejected(String),
}

impl Disposition {
    pub fn is_success(&self) -> bool {
        match self {
            Disposition::Reconciled(report) => report.is_success(),
            Disposition::Acknowledged => true,
            Disposition::Rejected(_) => false,
        }
    }
}

#[async_trait::async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn dispatch(&self, event: WebhookEvent) -> Disposition;
}
