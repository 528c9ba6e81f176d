//! Ferry kubehub: cluster connection, API discovery and dynamic object access.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ferry_core::{ClusterError, ResourceMapping};
use kube::{
    api::{Api, DeleteParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersion},
    discovery::{self, Scope},
    Client,
};

pub mod mapper;
pub mod memory;

pub use mapper::{KindIndex, ResourceMapper, Resolved};

/// One served resource as reported by API discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveredResource {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
    /// Whether `version` is the preferred version of its group.
    pub preferred: bool,
}

impl DiscoveredResource {
    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }

    pub fn mapping(&self) -> ResourceMapping {
        ResourceMapping {
            group: self.group.clone(),
            version: self.version.clone(),
            kind: self.kind.clone(),
            plural: self.plural.clone(),
            namespaced: self.namespaced,
        }
    }
}

/// Source of the cluster's served resource catalog.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    async fn catalog(&self) -> Result<Vec<DiscoveredResource>>;
}

/// Object address: a resolved mapping plus namespace (None for cluster-scoped) and name.
#[derive(Debug, Clone, Copy)]
pub struct ObjectTarget<'a> {
    pub mapping: &'a ResourceMapping,
    pub namespace: Option<&'a str>,
    pub name: &'a str,
}

impl std::fmt::Display for ObjectTarget<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.mapping.plural, ns, self.name),
            None => write!(f, "{}/{}", self.mapping.plural, self.name),
        }
    }
}

/// Dynamic get/create/replace/delete against the cluster.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get(&self, target: ObjectTarget<'_>) -> Result<DynamicObject, ClusterError>;
    async fn create(&self, target: ObjectTarget<'_>, obj: &DynamicObject) -> Result<DynamicObject, ClusterError>;
    /// Full-object replace; `obj.metadata.resourceVersion`, when set, guards against lost updates.
    async fn replace(&self, target: ObjectTarget<'_>, obj: &DynamicObject) -> Result<DynamicObject, ClusterError>;
    async fn delete(&self, target: ObjectTarget<'_>) -> Result<(), ClusterError>;
}

/// Build a kube client from in-cluster service account credentials or the
/// inferred local kubeconfig.
pub async fn connect(in_cluster: bool) -> Result<Client> {
    let client = if in_cluster {
        let config = kube::Config::incluster().context("loading in-cluster config")?;
        Client::try_from(config).context("building in-cluster client")?
    } else {
        Client::try_default().await.context("building client from kubeconfig")?
    };
    info!(in_cluster, "kube client ready");
    Ok(client)
}

pub fn api_resource(mapping: &ResourceMapping) -> ApiResource {
    ApiResource {
        group: mapping.group.clone(),
        version: mapping.version.clone(),
        api_version: mapping.api_version(),
        kind: mapping.kind.clone(),
        plural: mapping.plural.clone(),
    }
}

/// Map a kube error onto the classes the reconciler branches on.
pub fn classify(err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound,
        kube::Error::Api(resp) if resp.code == 409 => ClusterError::Conflict(resp.message),
        kube::Error::Api(resp) => ClusterError::Api { code: resp.code, message: resp.message },
        other => ClusterError::Transport(other.to_string()),
    }
}

/// Discovery over every group and every served version.
///
/// Each group version is queried on its own; one that fails (typically an
/// aggregated API whose backend is down) is skipped with a warning. Only
/// failing to list `/api` or `/apis` fails the catalog.
#[derive(Clone)]
pub struct KubeDiscovery {
    client: Client,
}

impl KubeDiscovery {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Every served group version, flagged with whether it is the group's preferred one.
    async fn group_versions(&self) -> Result<Vec<(GroupVersion, bool)>> {
        let core = self.client.list_core_api_versions().await.context("listing core API versions")?;
        let groups = self.client.list_api_groups().await.context("listing API groups")?;

        let mut out: Vec<(GroupVersion, bool)> =
            core.versions.iter().enumerate().map(|(i, v)| (GroupVersion::gv("", v), i == 0)).collect();
        for g in &groups.groups {
            let preferred = g
                .preferred_version
                .as_ref()
                .or_else(|| g.versions.first())
                .map(|p| p.version.as_str());
            for v in &g.versions {
                out.push((GroupVersion::gv(&g.name, &v.version), preferred == Some(v.version.as_str())));
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl DiscoverySource for KubeDiscovery {
    async fn catalog(&self) -> Result<Vec<DiscoveredResource>> {
        let mut out = Vec::new();
        let mut skipped = 0usize;
        for (gv, preferred) in self.group_versions().await? {
            let group = match discovery::pinned_group(&self.client, &gv).await {
                Ok(group) => group,
                Err(e) => {
                    skipped += 1;
                    counter!("ferry_discovery_group_failures_total", 1u64);
                    warn!(group_version = %gv.api_version(), error = %e, "skipping unavailable API group version");
                    continue;
                }
            };
            for (ar, caps) in group.versioned_resources(&gv.version) {
                out.push(DiscoveredResource {
                    group: ar.group,
                    version: ar.version,
                    kind: ar.kind,
                    plural: ar.plural,
                    namespaced: matches!(caps.scope, Scope::Namespaced),
                    preferred,
                });
            }
        }
        debug!(count = out.len(), skipped, "discovery catalog fetched");
        Ok(out)
    }
}

/// `ClusterApi` over the kube dynamic client.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, target: &ObjectTarget<'_>) -> Api<DynamicObject> {
        let ar = api_resource(target.mapping);
        match (target.mapping.namespaced, target.namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get(&self, target: ObjectTarget<'_>) -> Result<DynamicObject, ClusterError> {
        self.api(&target).get(target.name).await.map_err(classify)
    }

    async fn create(&self, target: ObjectTarget<'_>, obj: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        self.api(&target).create(&PostParams::default(), obj).await.map_err(classify)
    }

    async fn replace(&self, target: ObjectTarget<'_>, obj: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        self.api(&target).replace(target.name, &PostParams::default(), obj).await.map_err(classify)
    }

    async fn delete(&self, target: ObjectTarget<'_>) -> Result<(), ClusterError> {
        self.api(&target).delete(target.name, &DeleteParams::default()).await.map(|_| ()).map_err(classify)
    }
}

/// Process-wide cluster handles: the resource mapper (with its discovery
/// cache) and the object API. Built once at startup and shared read-only.
#[derive(Clone)]
pub struct Cluster {
    pub mapper: Arc<ResourceMapper>,
    pub api: Arc<dyn ClusterApi>,
}

impl Cluster {
    pub fn from_client(client: Client, discovery_cache_ttl: Duration) -> Self {
        let discovery = Arc::new(KubeDiscovery::new(client.clone()));
        Self::from_parts(discovery, Arc::new(KubeCluster::new(client)), discovery_cache_ttl)
    }

    pub fn from_parts(
        discovery: Arc<dyn DiscoverySource>,
        api: Arc<dyn ClusterApi>,
        discovery_cache_ttl: Duration,
    ) -> Self {
        Self { mapper: Arc::new(ResourceMapper::new(discovery, discovery_cache_ttl)), api }
    }
}
