//! Ferry core types: change sets, manifests, mappings and outcomes.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod changes;
pub mod error;

pub use changes::{ChangeBatch, ChangeSet, Commit};
pub use error::{ApplyError, ClusterError, DecodeError, FetchError, ManifestError, MappingError};

/// Repository coordinates as reported by the push payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Everything the reconciliation flow needs from one push delivery.
#[derive(Debug, Clone)]
pub struct PushDelivery {
    pub repo: RepoRef,
    /// Ref (usually the `after` commit sha) used to read added and modified files.
    pub head_ref: String,
    pub batch: ChangeBatch,
}

/// A single decoded resource manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestObject {
    /// API group; empty for the core group.
    pub group: String,
    pub version: String,
    pub kind: String,
    pub name: String,
    /// Never empty once decoded.
    pub namespace: String,
    /// Full document, field order preserved.
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl ManifestObject {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// `group/version/Kind` (or `version/Kind` for the core group).
    pub fn gvk_key(&self) -> String {
        format!("{}/{}", self.api_version(), self.kind)
    }
}

/// REST addressing for a kind, resolved from live discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceMapping {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Plural resource name used in the collection URL, e.g. `deployments`.
    pub plural: String,
    pub namespaced: bool,
}

impl ResourceMapping {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileAction {
    Upsert,
    Delete,
}

impl std::fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileAction::Upsert => f.write_str("upsert"),
            ReconcileAction::Delete => f.write_str("delete"),
        }
    }
}

/// Result of reconciling one manifest.
#[derive(Debug)]
pub enum ReconcileOutcome {
    Created(String),
    Updated(String),
    Deleted(String),
    Failed(ManifestError),
}

impl ReconcileOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ReconcileOutcome::Failed(_))
    }

    /// Short label used for logs and metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Created(_) => "created",
            ReconcileOutcome::Updated(_) => "updated",
            ReconcileOutcome::Deleted(_) => "deleted",
            ReconcileOutcome::Failed(_) => "failed",
        }
    }
}

impl From<ManifestError> for ReconcileOutcome {
    fn from(err: ManifestError) -> Self {
        ReconcileOutcome::Failed(err)
    }
}

/// Produces manifest bytes from the source repository.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Read `path` as of `git_ref`.
    async fn fetch_at_ref(&self, repo: &RepoRef, path: &str, git_ref: &str) -> Result<Vec<u8>, FetchError>;

    /// Read the last content `path` had before it was removed.
    ///
    /// `removing_commit` is the id of the commit that removed the file when the
    /// push payload names one; implementations fall back to scanning history.
    async fn fetch_before_removal(
        &self,
        repo: &RepoRef,
        path: &str,
        removing_commit: Option<&str>,
    ) -> Result<Vec<u8>, FetchError>;
}

pub mod prelude {
    pub use super::{
        ChangeBatch, ChangeSet, Commit, ContentSource, ManifestError, ManifestObject, PushDelivery,
        ReconcileAction, ReconcileOutcome, RepoRef, ResourceMapping,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_omits_core_group() {
        let m = ResourceMapping {
            group: String::new(),
            version: "v1".into(),
            kind: "ConfigMap".into(),
            plural: "configmaps".into(),
            namespaced: true,
        };
        assert_eq!(m.api_version(), "v1");
        let m = ResourceMapping { group: "apps".into(), ..m };
        assert_eq!(m.api_version(), "apps/v1");
    }
}
