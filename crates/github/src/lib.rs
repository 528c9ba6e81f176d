//! Ferry github: manifest bytes from the GitHub REST API.
//!
//! Files are read through the contents endpoint at a given ref. A removed
//! file is read at the first parent of the commit that removed it; when the
//! push does not name that commit, recent history is scanned for it.

#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use ferry_core::{ContentSource, FetchError, RepoRef};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Commits inspected when searching history for a removal.
const HISTORY_DEPTH: usize = 30;

#[derive(Debug, Deserialize)]
struct FileContent {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitFile {
    filename: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    sha: String,
    #[serde(default)]
    parents: Vec<CommitRef>,
    #[serde(default)]
    files: Vec<CommitFile>,
}

impl CommitDetail {
    fn removes(&self, path: &str) -> bool {
        self.files.iter().any(|f| f.filename == path && f.status == "removed")
    }
}

/// `ContentSource` over `api.github.com` (or a GitHub Enterprise API root).
#[derive(Clone)]
pub struct GithubContents {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl GithubContents {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("ferry")
            .timeout(timeout)
            .build()
            .context("building GitHub HTTP client")?;
        Self::with_client(client, base_url, token)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str, token: Option<String>) -> Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("parsing GitHub API url {}", base_url))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("GitHub API url {} cannot be a base", base_url);
        }
        let token = token.filter(|t| !t.is_empty());
        if token.is_none() {
            info!("no GitHub token configured; using anonymous requests");
        }
        Ok(Self { client, base, token })
    }

    fn url(&self, repo: &RepoRef, tail: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segs) = url.path_segments_mut() {
            segs.pop_if_empty().extend(["repos", repo.owner.as_str(), repo.name.as_str()]).extend(tail);
        }
        url
    }

    fn contents_url(&self, repo: &RepoRef, path: &str, git_ref: &str) -> Url {
        let mut tail = vec!["contents"];
        tail.extend(path.split('/').filter(|s| !s.is_empty()));
        let mut url = self.url(repo, &tail);
        url.query_pairs_mut().append_pair("ref", git_ref);
        url
    }

    /// GET and decode JSON; `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(&self, url: Url, what: &str) -> Result<Option<T>, FetchError> {
        let mut req = self
            .client
            .get(url.clone())
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(|e| FetchError::Http(format!("GET {}: {}", url.path(), e)))?;
        match resp.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            s if !s.is_success() => return Err(FetchError::Http(format!("GET {} returned {}", url.path(), s))),
            _ => {}
        }
        let body = resp
            .json::<T>()
            .await
            .map_err(|e| FetchError::Decode { path: what.to_string(), reason: e.to_string() })?;
        Ok(Some(body))
    }

    async fn commit(&self, repo: &RepoRef, sha: &str) -> Result<Option<CommitDetail>, FetchError> {
        self.get_json(self.url(repo, &["commits", sha]), sha).await
    }

    async fn scan_for_removal(&self, repo: &RepoRef, path: &str) -> Result<CommitDetail, FetchError> {
        let mut url = self.url(repo, &["commits"]);
        url.query_pairs_mut().append_pair("per_page", &HISTORY_DEPTH.to_string());
        let recent: Vec<CommitRef> = self.get_json(url, "commits").await?.unwrap_or_default();
        for c in recent {
            if let Some(detail) = self.commit(repo, &c.sha).await? {
                if detail.removes(path) {
                    debug!(repo = %repo, path, commit = %detail.sha, "found removing commit");
                    return Ok(detail);
                }
            }
        }
        Err(FetchError::RemovalNotFound { path: path.to_string() })
    }
}

fn decode_content(path: &str, file: &FileContent) -> Result<Vec<u8>, FetchError> {
    if file.encoding != "base64" {
        return Err(FetchError::Decode {
            path: path.to_string(),
            reason: format!("unsupported encoding {:?}", file.encoding),
        });
    }
    let compact: String = file.content.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| FetchError::Decode { path: path.to_string(), reason: e.to_string() })
}

#[async_trait]
impl ContentSource for GithubContents {
    async fn fetch_at_ref(&self, repo: &RepoRef, path: &str, git_ref: &str) -> Result<Vec<u8>, FetchError> {
        let file: FileContent = self
            .get_json(self.contents_url(repo, path, git_ref), path)
            .await?
            .ok_or_else(|| FetchError::NotFound { path: path.to_string(), git_ref: git_ref.to_string() })?;
        let bytes = decode_content(path, &file)?;
        debug!(repo = %repo, path, git_ref, size = bytes.len(), "file fetched");
        Ok(bytes)
    }

    async fn fetch_before_removal(
        &self,
        repo: &RepoRef,
        path: &str,
        removing_commit: Option<&str>,
    ) -> Result<Vec<u8>, FetchError> {
        let removing = match removing_commit {
            Some(sha) => self
                .commit(repo, sha)
                .await?
                .ok_or_else(|| FetchError::RemovalNotFound { path: path.to_string() })?,
            None => self.scan_for_removal(repo, path).await?,
        };
        let parent = removing
            .parents
            .first()
            .ok_or_else(|| FetchError::RemovalNotFound { path: path.to_string() })?;
        let bytes = self.fetch_at_ref(repo, path, &parent.sha).await?;
        info!(repo = %repo, path, parent = %parent.sha, "fetched content of removed file");
        Ok(bytes)
    }
}
