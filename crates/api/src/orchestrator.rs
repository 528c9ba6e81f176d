//! Per-delivery flow: extract → fetch → decode → map → reconcile.
//!
//! Paths are processed one at a time, added then modified then removed, each
//! category in lexicographic order. A failing manifest is logged and recorded;
//! the remaining paths are still processed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, error, info, warn};

use ferry_apply::{ManifestDecoder, Reconciler};
use ferry_core::{ChangeSet, ContentSource, ManifestError, PushDelivery, ReconcileOutcome};
use ferry_kubehub::{Cluster, ResourceMapper};

use crate::{ChangeKind, DeliveryHandler, DeliveryReport, Disposition, ManifestReport, Settings, WebhookEvent};

async fn bounded<F: Future>(stage: &'static str, after: Duration, fut: F) -> Result<F::Output, ManifestError> {
    tokio::time::timeout(after, fut).await.map_err(|_| ManifestError::Timeout { stage, after })
}

pub struct Orchestrator {
    content: Arc<dyn ContentSource>,
    decoder: ManifestDecoder,
    mapper: Arc<ResourceMapper>,
    reconciler: Reconciler,
    settings: Settings,
}

impl Orchestrator {
    pub fn new(
        cluster: &Cluster,
        content: Arc<dyn ContentSource>,
        decoder: ManifestDecoder,
        settings: Settings,
    ) -> Self {
        Self {
            content,
            decoder,
            mapper: cluster.mapper.clone(),
            reconciler: Reconciler::new(cluster.api.clone()),
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn handle(&self, delivery: &PushDelivery) -> DeliveryReport {
        let changes = ChangeSet::extract(&delivery.batch);
        info!(
            repo = %delivery.repo,
            head = %delivery.head_ref,
            commits = delivery.batch.commits.len(),
            added = changes.added.len(),
            modified = changes.modified.len(),
            removed = changes.removed.len(),
            "processing push"
        );
        let mut report = DeliveryReport::default();
        for (change, paths) in [
            (ChangeKind::Added, &changes.added),
            (ChangeKind::Modified, &changes.modified),
            (ChangeKind::Removed, &changes.removed),
        ] {
            for path in paths {
                let outcome = match self.process(delivery, change, path).await {
                    Ok(outcome) => outcome,
                    Err(e) => ReconcileOutcome::Failed(e),
                };
                counter!("ferry_reconcile_total", 1u64, "outcome" => outcome.label());
                match &outcome {
                    ReconcileOutcome::Failed(e) => {
                        counter!("ferry_manifest_failures_total", 1u64, "kind" => e.kind());
                        error!(path = %path, %change, action = %change.action(), error = %e, "manifest failed");
                    }
                    ok => info!(path = %path, %change, outcome = ok.label(), "manifest reconciled"),
                }
                report.manifests.push(ManifestReport { path: path.clone(), change, outcome });
            }
        }
        if !report.is_success() {
            warn!(failures = report.failures(), total = report.manifests.len(), "push reconciled with failures");
        }
        report
    }

    async fn process(
        &self,
        delivery: &PushDelivery,
        change: ChangeKind,
        path: &str,
    ) -> Result<ReconcileOutcome, ManifestError> {
        let fetch = async {
            match change {
                ChangeKind::Added | ChangeKind::Modified => {
                    self.content.fetch_at_ref(&delivery.repo, path, &delivery.head_ref).await
                }
                ChangeKind::Removed => {
                    let hint = delivery.batch.removing_commit(path);
                    self.content.fetch_before_removal(&delivery.repo, path, hint).await
                }
            }
        };
        let bytes = bounded("fetch", self.settings.fetch_timeout, fetch).await??;
        let object = self.decoder.decode(&bytes)?;
        let resolved = bounded(
            "discovery",
            self.settings.discovery_timeout,
            self.mapper.lookup(&object.group, &object.version, &object.kind),
        )
        .await??;
        let action = change.action();
        let applied = bounded(
            "apply",
            self.settings.apply_timeout,
            self.reconciler.attempt(&resolved.mapping, &object, action),
        )
        .await?;
        if !(resolved.cached && applied.not_found) {
            return Ok(applied.outcome);
        }

        // A 404 through a cached mapping may mean the route itself is gone
        debug!(
            path,
            kind = %object.kind,
            plural = %resolved.mapping.plural,
            "not found via cached mapping; revalidating"
        );
        self.mapper.invalidate();
        let mapping = bounded(
            "discovery",
            self.settings.discovery_timeout,
            self.mapper.resolve(&object.group, &object.version, &object.kind),
        )
        .await??;
        bounded("apply", self.settings.apply_timeout, self.reconciler.apply(&mapping, &object, action)).await
    }
}

#[async_trait::async_trait]
impl DeliveryHandler for Orchestrator {
    async fn dispatch(&self, event: WebhookEvent) -> Disposition {
        counter!("ferry_webhook_deliveries_total", 1u64);
        match event {
            WebhookEvent::Push(delivery) => Disposition::Reconciled(self.handle(&delivery).await),
            WebhookEvent::Ping { hook_id } => {
                info!(hook_id = ?hook_id, "hook registered");
                Disposition::Acknowledged
            }
            WebhookEvent::Unsupported(kind) => {
                warn!(event = %kind, "unsupported event");
                Disposition::Rejected(format!("unsupported event: {}", kind))
            }
        }
    }
}
