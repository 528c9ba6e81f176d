//! GitHub webhook payloads, reduced to what the reconciliation flow reads.

use serde::Deserialize;

use ferry_api::WebhookEvent;
use ferry_core::{ChangeBatch, Commit, PushDelivery, RepoRef};

use crate::error::WebhookError;

#[derive(Debug, Deserialize)]
struct Owner {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    login: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: String,
    owner: Owner,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref", default)]
    git_ref: String,
    #[serde(default)]
    after: String,
    #[serde(default)]
    commits: Vec<Commit>,
    repository: Repository,
}

#[derive(Debug, Deserialize)]
struct PingPayload {
    #[serde(default)]
    hook_id: Option<u64>,
}

fn malformed(event: &str, reason: impl ToString) -> WebhookError {
    WebhookError::Malformed { event: event.to_string(), reason: reason.to_string() }
}

/// `after` is all zeros when the push deleted the ref.
fn head_ref(after: &str, git_ref: &str) -> String {
    if after.is_empty() || after.bytes().all(|b| b == b'0') {
        git_ref.to_string()
    } else {
        after.to_string()
    }
}

impl PushPayload {
    fn into_delivery(self) -> Result<PushDelivery, WebhookError> {
        let Owner { name, login } = self.repository.owner;
        let owner = name
            .filter(|n| !n.is_empty())
            .or(login.filter(|l| !l.is_empty()))
            .ok_or_else(|| malformed("push", "repository owner has neither name nor login"))?;
        let head_ref = head_ref(&self.after, &self.git_ref);
        if head_ref.is_empty() {
            return Err(malformed("push", "neither after nor ref is set"));
        }
        Ok(PushDelivery {
            repo: RepoRef { owner, name: self.repository.name },
            head_ref,
            batch: ChangeBatch::new(self.commits),
        })
    }
}

/// Classify a delivery by its `X-GitHub-Event` value and parse the body.
pub fn parse_event(event: &str, body: &[u8]) -> Result<WebhookEvent, WebhookError> {
    match event {
        "push" => {
            let payload: PushPayload = serde_json::from_slice(body).map_err(|e| malformed(event, e))?;
            Ok(WebhookEvent::Push(payload.into_delivery()?))
        }
        "ping" => {
            let payload: PingPayload = serde_json::from_slice(body).map_err(|e| malformed(event, e))?;
            Ok(WebhookEvent::Ping { hook_id: payload.hook_id })
        }
        other => Ok(WebhookEvent::Unsupported(other.to_string())),
    }
}
