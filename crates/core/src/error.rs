//! Error kinds of the reconciliation flow.
//!
//! Every kind is local to one manifest: it aborts that manifest only and is
//! recorded in the delivery report.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("manifest is empty")]
    Empty,
    #[error("manifest too large ({size} bytes > {max})")]
    TooLarge { size: usize, max: usize },
    #[error("manifest too complex (>{max} nodes)")]
    TooComplex { max: usize },
    #[error("manifest is not valid UTF-8")]
    NotUtf8,
    #[error("expected a single document, found {count}")]
    MultiDocument { count: usize },
    #[error("parsing YAML: {0}")]
    Syntax(String),
    #[error("converting YAML to JSON: {0}")]
    Convert(String),
    #[error("manifest is not a mapping")]
    NotAMapping,
    #[error("manifest missing apiVersion")]
    MissingApiVersion,
    #[error("manifest missing kind")]
    MissingKind,
    #[error("manifest missing metadata.name")]
    MissingName,
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("discovery failed: {0}")]
    Discovery(String),
    #[error("no served resource for {}", gvk(.group, .version, .kind))]
    NoMatch { group: String, version: String, kind: String },
}

fn gvk(group: &str, version: &str, kind: &str) -> String {
    if group.is_empty() {
        format!("{}/{}", version, kind)
    } else {
        format!("{}/{}/{}", group, version, kind)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{path} not found at {git_ref}")]
    NotFound { path: String, git_ref: String },
    #[error("no commit removing {path} found in history")]
    RemovalNotFound { path: String },
    #[error("content request failed: {0}")]
    Http(String),
    #[error("decoding content of {path}: {reason}")]
    Decode { path: String, reason: String },
}

/// Failure reported by the cluster API, classified by what the reconciler
/// needs to branch on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("api error {code}: {message}")]
    Api { code: u16, message: String },
    #[error("transport: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("reading {name}: {source}")]
    Get { name: String, source: ClusterError },
    #[error("creating {name}: {source}")]
    Create { name: String, source: ClusterError },
    #[error("updating {name}: {source}")]
    Replace { name: String, source: ClusterError },
    #[error("deleting {name}: {source}")]
    Delete { name: String, source: ClusterError },
    #[error("{name} changed since it was read (resourceVersion {observed}): {message}")]
    Conflict { name: String, observed: String, message: String },
    #[error("building request body for {name}: {reason}")]
    Invalid { name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },
}

impl ManifestError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ManifestError::Decode(_) => "decode",
            ManifestError::Mapping(_) => "mapping",
            ManifestError::Fetch(_) => "fetch",
            ManifestError::Apply(_) => "apply",
            ManifestError::Timeout { .. } => "timeout",
        }
    }
}
