//! Create-or-update-or-delete of one decoded manifest.
//!
//! Upsert reads the live object first: not found → create, found → full
//! replace carrying the observed resourceVersion, so a concurrent writer makes
//! the replace fail with a conflict instead of being overwritten. Delete treats
//! not found as success. Nothing is retried here.

use std::sync::Arc;
use std::time::Instant;

use kube::core::DynamicObject;
use metrics::{counter, histogram};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use ferry_core::{ApplyError, ClusterError, ManifestObject, ReconcileAction, ReconcileOutcome, ResourceMapping};
use ferry_kubehub::{ClusterApi, ObjectTarget};

#[derive(Debug)]
pub struct Applied {
    pub outcome: ReconcileOutcome,
    /// The server answered 404 where the outcome depended on it.
    pub not_found: bool,
}

#[derive(Clone)]
pub struct Reconciler {
    cluster: Arc<dyn ClusterApi>,
}

impl Reconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    pub async fn apply(
        &self,
        mapping: &ResourceMapping,
        object: &ManifestObject,
        action: ReconcileAction,
    ) -> ReconcileOutcome {
        self.attempt(mapping, object, action).await.outcome
    }

    /// `apply`, also reporting whether the outcome rests on a 404 for the
    /// target. Through a stale mapping such a 404 means the route is no
    /// longer served rather than that the object is absent.
    pub async fn attempt(
        &self,
        mapping: &ResourceMapping,
        object: &ManifestObject,
        action: ReconcileAction,
    ) -> Applied {
        let t0 = Instant::now();
        counter!("ferry_apply_attempts_total", 1u64);
        let target = ObjectTarget {
            mapping,
            namespace: mapping.namespaced.then_some(object.namespace.as_str()),
            name: &object.name,
        };
        let (res, not_found) = match action {
            ReconcileAction::Upsert => {
                let res = self.upsert(target, object).await;
                let not_found = matches!(res, Err(ApplyError::Create { source: ClusterError::NotFound, .. }));
                (res, not_found)
            }
            ReconcileAction::Delete => match self.delete(target).await {
                Ok(existed) => (Ok(ReconcileOutcome::Deleted(object.name.clone())), !existed),
                Err(e) => (Err(e), false),
            },
        };
        histogram!("ferry_apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        let outcome = match res {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(resource = %target, %action, error = %e, "apply failed");
                ReconcileOutcome::Failed(e.into())
            }
        };
        Applied { outcome, not_found }
    }

    async fn upsert(&self, target: ObjectTarget<'_>, object: &ManifestObject) -> Result<ReconcileOutcome, ApplyError> {
        let mut body = request_body(target.mapping, object)?;
        match self.cluster.get(target).await {
            Err(ClusterError::NotFound) => {
                let created = self
                    .cluster
                    .create(target, &body)
                    .await
                    .map_err(|source| ApplyError::Create { name: object.name.clone(), source })?;
                let name = created.metadata.name.unwrap_or_else(|| object.name.clone());
                info!(resource = %target, "resource created");
                Ok(ReconcileOutcome::Created(name))
            }
            Ok(live) => {
                let observed = live.metadata.resource_version;
                body.metadata.resource_version = observed.clone();
                match self.cluster.replace(target, &body).await {
                    Ok(_) => {
                        info!(resource = %target, rv = ?observed, "resource updated");
                        Ok(ReconcileOutcome::Updated(object.name.clone()))
                    }
                    Err(ClusterError::Conflict(message)) => Err(ApplyError::Conflict {
                        name: object.name.clone(),
                        observed: observed.unwrap_or_default(),
                        message,
                    }),
                    Err(source) => Err(ApplyError::Replace { name: object.name.clone(), source }),
                }
            }
            Err(source) => Err(ApplyError::Get { name: object.name.clone(), source }),
        }
    }

    /// `Ok(false)` when the object was already absent.
    async fn delete(&self, target: ObjectTarget<'_>) -> Result<bool, ApplyError> {
        match self.cluster.delete(target).await {
            Ok(()) => {
                info!(resource = %target, "resource deleted");
                Ok(true)
            }
            Err(ClusterError::NotFound) => {
                debug!(resource = %target, "already absent");
                Ok(false)
            }
            Err(source) => Err(ApplyError::Delete { name: target.name.to_string(), source }),
        }
    }
}

/// Server-populated fields a manifest must not send back.
fn strip_noisy(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
            obj.remove("resourceVersion");
            obj.remove("generation");
            obj.remove("creationTimestamp");
            obj.remove("uid");
        }
    }
    if let Some(obj) = v.as_object_mut() { obj.remove("status"); }
    v
}

fn request_body(mapping: &ResourceMapping, object: &ManifestObject) -> Result<DynamicObject, ApplyError> {
    let mut v = strip_noisy(Json::Object(object.attributes.clone()));
    if !mapping.namespaced {
        if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            meta.remove("namespace");
        }
    }
    serde_json::from_value(v).map_err(|e| ApplyError::Invalid { name: object.name.clone(), reason: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(attrs: Json) -> ManifestObject {
        ManifestObject {
            group: String::new(),
            version: "v1".into(),
            kind: "Namespace".into(),
            name: "team-a".into(),
            namespace: "default".into(),
            attributes: attrs.as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn strip_noisy_prunes_server_fields() {
        let v = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "x",
                "namespace": "ns",
                "managedFields": [ {"foo": "bar"} ],
                "resourceVersion": "123",
                "generation": 5,
                "uid": "0000",
                "creationTimestamp": "2020-01-01T00:00:00Z"
            },
            "status": { "obs": true },
            "data": { "k": "v" }
        });
        let pruned = strip_noisy(v);
        let meta = pruned.get("metadata").unwrap().as_object().unwrap();
        assert!(!meta.contains_key("managedFields"));
        assert!(!meta.contains_key("resourceVersion"));
        assert!(!meta.contains_key("generation"));
        assert!(!meta.contains_key("creationTimestamp"));
        assert!(!meta.contains_key("uid"));
        assert_eq!(meta["namespace"], "ns");
        assert!(!pruned.as_object().unwrap().contains_key("status"));
    }

    #[test]
    fn cluster_scoped_body_drops_namespace() {
        let mapping = ResourceMapping {
            group: String::new(),
            version: "v1".into(),
            kind: "Namespace".into(),
            plural: "namespaces".into(),
            namespaced: false,
        };
        let obj = object(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": "team-a", "namespace": "default", "labels": { "team": "a" } }
        }));
        let body = request_body(&mapping, &obj).unwrap();
        assert_eq!(body.metadata.name.as_deref(), Some("team-a"));
        assert!(body.metadata.namespace.is_none());
        assert_eq!(body.types.as_ref().map(|t| t.kind.as_str()), Some("Namespace"));
    }
}
