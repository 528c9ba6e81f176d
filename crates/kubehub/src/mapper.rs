//! Kind → REST resource resolution over a discovery snapshot.
//!
//! Lookups prefer an exact group/version/kind match and otherwise fall back to
//! the preferred version serving the group-kind. Snapshots may be cached for a
//! TTL; a miss against a cached snapshot always triggers one fresh discovery
//! before failing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use kube::core::Version;
use metrics::counter;
use rustc_hash::FxHashMap;
use tracing::debug;

use ferry_core::{MappingError, ResourceMapping};

use crate::{DiscoveredResource, DiscoverySource};

/// Group-kind index built from one discovery catalog.
#[derive(Debug, Default)]
pub struct KindIndex {
    by_group_kind: FxHashMap<(String, String), Vec<DiscoveredResource>>,
}

impl KindIndex {
    pub fn build(catalog: Vec<DiscoveredResource>) -> Self {
        let mut by_group_kind: FxHashMap<(String, String), Vec<DiscoveredResource>> = FxHashMap::default();
        for r in catalog {
            by_group_kind.entry((r.group.clone(), r.kind.clone())).or_default().push(r);
        }
        // Preferred version first, the rest by Kubernetes version priority (v2 > v1 > v2beta1 > v1alpha1)
        for entries in by_group_kind.values_mut() {
            entries.sort_by(|a, b| {
                b.preferred.cmp(&a.preferred).then_with(|| {
                    Version::parse(&b.version).priority().cmp(&Version::parse(&a.version).priority())
                })
            });
        }
        Self { by_group_kind }
    }

    pub fn len(&self) -> usize {
        self.by_group_kind.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_group_kind.is_empty()
    }

    pub fn lookup(&self, group: &str, version: &str, kind: &str) -> Option<ResourceMapping> {
        let entries = self.by_group_kind.get(&(group.to_string(), kind.to_string()))?;
        let hit = entries.iter().find(|r| r.version == version).or_else(|| entries.first())?;
        if hit.version != version {
            debug!(group, kind, requested = version, served = %hit.version, "falling back to preferred version");
        }
        Some(hit.mapping())
    }
}

/// A resolved mapping and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub mapping: ResourceMapping,
    pub cached: bool,
}

struct Snapshot {
    taken: Instant,
    index: KindIndex,
}

/// Resolves kinds to REST mappings using live discovery.
pub struct ResourceMapper {
    source: Arc<dyn DiscoverySource>,
    ttl: Duration,
    cache: ArcSwapOption<Snapshot>,
}

impl ResourceMapper {
    /// `ttl` of zero disables caching: every resolution queries discovery.
    pub fn new(source: Arc<dyn DiscoverySource>, ttl: Duration) -> Self {
        Self { source, ttl, cache: ArcSwapOption::empty() }
    }

    pub async fn resolve(&self, group: &str, version: &str, kind: &str) -> Result<ResourceMapping, MappingError> {
        self.lookup(group, version, kind).await.map(|r| r.mapping)
    }

    /// Like `resolve`, also reporting whether the answer came from a cached
    /// snapshot. Callers that get a 404 through a cached mapping should
    /// `invalidate` and resolve again before trusting it.
    pub async fn lookup(&self, group: &str, version: &str, kind: &str) -> Result<Resolved, MappingError> {
        if let Some(snap) = self.cached() {
            if let Some(mapping) = snap.index.lookup(group, version, kind) {
                return Ok(Resolved { mapping, cached: true });
            }
            debug!(group, version, kind, "cached discovery has no match; refreshing");
            self.invalidate();
        }
        let snap = self.refresh().await?;
        let mapping = snap.index.lookup(group, version, kind).ok_or_else(|| MappingError::NoMatch {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        })?;
        Ok(Resolved { mapping, cached: false })
    }

    pub fn invalidate(&self) {
        self.cache.store(None);
    }

    fn cached(&self) -> Option<Arc<Snapshot>> {
        if self.ttl.is_zero() {
            return None;
        }
        self.cache.load_full().filter(|s| s.taken.elapsed() < self.ttl)
    }

    async fn refresh(&self) -> Result<Arc<Snapshot>, MappingError> {
        counter!("ferry_discovery_refresh_total", 1u64);
        let catalog = self.source.catalog().await.map_err(|e| MappingError::Discovery(format!("{:#}", e)))?;
        let snap = Arc::new(Snapshot { taken: Instant::now(), index: KindIndex::build(catalog) });
        debug!(kinds = snap.index.len(), "discovery snapshot built");
        if !self.ttl.is_zero() {
            self.cache.store(Some(snap.clone()));
        }
        Ok(snap)
    }
}
