//! In-memory discovery and object store.
//!
//! Used by tests across the workspace and handy for exercising the webhook
//! flow locally without a cluster. Semantics follow the API server where the
//! reconciler depends on them: 404 on missing objects, 409 on create of an
//! existing name and on replace with a stale resourceVersion.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use kube::core::DynamicObject;

use ferry_core::ClusterError;

use crate::{ClusterApi, DiscoveredResource, DiscoverySource, ObjectTarget};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Fixed discovery catalog, optionally failing every call.
#[derive(Default)]
pub struct StaticDiscovery {
    resources: Mutex<Vec<DiscoveredResource>>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl StaticDiscovery {
    pub fn new(resources: Vec<DiscoveredResource>) -> Self {
        Self { resources: Mutex::new(resources), ..Default::default() }
    }

    pub fn failing(reason: &str) -> Self {
        Self { failure: Some(reason.to_string()), ..Default::default() }
    }

    /// Register another served resource (e.g. a CRD installed later).
    pub fn push(&self, resource: DiscoveredResource) {
        lock(&self.resources).push(resource);
    }

    /// Stop serving `kind` (e.g. its CRD was deleted).
    pub fn remove_kind(&self, kind: &str) {
        lock(&self.resources).retain(|r| r.kind != kind);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscoverySource for StaticDiscovery {
    async fn catalog(&self) -> Result<Vec<DiscoveredResource>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.failure {
            return Err(anyhow!("{}", reason));
        }
        Ok(lock(&self.resources).clone())
    }
}

#[derive(Default)]
struct Objects {
    items: BTreeMap<String, DynamicObject>,
    next_rv: u64,
}

/// Object store keyed by `plural/namespace/name`.
#[derive(Default)]
pub struct MemoryCluster {
    objects: Mutex<Objects>,
    ops: Mutex<Vec<String>>,
    denied: Mutex<Vec<String>>,
    race_next_get: AtomicBool,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation performed so far, as `verb target`.
    pub fn operations(&self) -> Vec<String> {
        lock(&self.ops).clone()
    }

    pub fn contains(&self, plural: &str, namespace: Option<&str>, name: &str) -> bool {
        lock(&self.objects).items.contains_key(&key_parts(plural, namespace, name))
    }

    pub fn object(&self, plural: &str, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
        lock(&self.objects).items.get(&key_parts(plural, namespace, name)).cloned()
    }

    /// Reject every request on `plural` with 403.
    pub fn deny(&self, plural: &str) {
        lock(&self.denied).push(plural.to_string());
    }

    /// Simulate another writer updating the object right after the next get.
    pub fn race_next_get(&self) {
        self.race_next_get.store(true, Ordering::SeqCst);
    }

    fn record(&self, verb: &str, target: &ObjectTarget<'_>) -> Result<String, ClusterError> {
        lock(&self.ops).push(format!("{} {}", verb, target));
        if lock(&self.denied).iter().any(|p| p == &target.mapping.plural) {
            return Err(ClusterError::Api { code: 403, message: format!("{} is forbidden", target) });
        }
        Ok(key_parts(&target.mapping.plural, target.namespace, target.name))
    }
}

fn key_parts(plural: &str, namespace: Option<&str>, name: &str) -> String {
    format!("{}/{}/{}", plural, namespace.unwrap_or(""), name)
}

fn bump(objects: &mut Objects, obj: &mut DynamicObject) {
    objects.next_rv += 1;
    obj.metadata.resource_version = Some(objects.next_rv.to_string());
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn get(&self, target: ObjectTarget<'_>) -> Result<DynamicObject, ClusterError> {
        let key = self.record("get", &target)?;
        let mut objects = lock(&self.objects);
        let found = objects.items.get(&key).cloned().ok_or(ClusterError::NotFound)?;
        if self.race_next_get.swap(false, Ordering::SeqCst) {
            let mut raced = found.clone();
            bump(&mut objects, &mut raced);
            objects.items.insert(key, raced);
        }
        Ok(found)
    }

    async fn create(&self, target: ObjectTarget<'_>, obj: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        let key = self.record("create", &target)?;
        let mut objects = lock(&self.objects);
        if objects.items.contains_key(&key) {
            return Err(ClusterError::Conflict(format!("{} already exists", target)));
        }
        let mut stored = obj.clone();
        bump(&mut objects, &mut stored);
        objects.items.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace(&self, target: ObjectTarget<'_>, obj: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        let key = self.record("replace", &target)?;
        let mut objects = lock(&self.objects);
        let live_rv = objects
            .items
            .get(&key)
            .ok_or(ClusterError::NotFound)?
            .metadata
            .resource_version
            .clone();
        if let Some(rv) = obj.metadata.resource_version.as_deref() {
            if live_rv.as_deref() != Some(rv) {
                return Err(ClusterError::Conflict(format!(
                    "the object has been modified; please apply your changes to the latest version ({})",
                    target
                )));
            }
        }
        let mut stored = obj.clone();
        bump(&mut objects, &mut stored);
        objects.items.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, target: ObjectTarget<'_>) -> Result<(), ClusterError> {
        let key = self.record("delete", &target)?;
        lock(&self.objects).items.remove(&key).map(|_| ()).ok_or(ClusterError::NotFound)
    }
}
