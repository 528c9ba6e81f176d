//! Change sets derived from the commits of one push.
//!
//! Paths are collected per category with set semantics. Each set iterates in
//! lexicographic order so that reconciliation order does not depend on how the
//! upstream payload happened to list its commits.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Commit {
    /// Commit sha, when the payload carries one.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

/// Ordered commits of a single push delivery.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeBatch {
    pub commits: Vec<Commit>,
}

impl ChangeBatch {
    pub fn new(commits: Vec<Commit>) -> Self {
        Self { commits }
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    /// Id of the last commit in the batch that removed `path`.
    pub fn removing_commit(&self, path: &str) -> Option<&str> {
        self.commits
            .iter()
            .rev()
            .find(|c| c.removed.iter().any(|p| p == path))
            .and_then(|c| c.id.as_deref())
    }
}

/// Deduplicated added/modified/removed paths.
///
/// No cross-set reconciliation happens: a path added in one commit and removed
/// in a later one is present in both `added` and `removed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl ChangeSet {
    pub fn extract(batch: &ChangeBatch) -> Self {
        let mut out = ChangeSet::default();
        for commit in &batch.commits {
            out.added.extend(commit.added.iter().cloned());
            out.modified.extend(commit.modified.iter().cloned());
            out.removed.extend(commit.removed.iter().cloned());
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }
}
