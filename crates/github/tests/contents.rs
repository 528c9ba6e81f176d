#![forbid(unsafe_code)]

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ferry_core::{ContentSource, FetchError, RepoRef};
use ferry_github::GithubContents;

const BODY: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n";

fn repo() -> RepoRef {
    RepoRef { owner: "acme".into(), name: "deploy".into() }
}

fn source(server: &MockServer, token: Option<&str>) -> GithubContents {
    GithubContents::new(&server.uri(), token.map(String::from), Duration::from_secs(5)).unwrap()
}

/// Contents API answer, wrapped at 60 columns like GitHub does.
fn file_json(body: &str) -> serde_json::Value {
    let encoded = STANDARD.encode(body);
    let wrapped: Vec<String> = encoded
        .as_bytes()
        .chunks(60)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect();
    json!({ "type": "file", "encoding": "base64", "content": wrapped.join("\n") })
}

async fn mount_file(server: &MockServer, file: &str, git_ref: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/acme/deploy/contents/{}", file)))
        .and(query_param("ref", git_ref))
        .respond_with(ResponseTemplate::new(200).set_body_json(file_json(body)))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_commit(server: &MockServer, sha: &str, parent: &str, files: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/acme/deploy/commits/{}", sha)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sha": sha,
            "parents": [{ "sha": parent }],
            "files": files
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn fetches_file_at_ref() {
    let server = MockServer::start().await;
    mount_file(&server, "apps/a.yaml", "c2", BODY).await;

    let bytes = source(&server, None).fetch_at_ref(&repo(), "apps/a.yaml", "c2").await.unwrap();

    assert_eq!(bytes, BODY.as_bytes());
}

#[tokio::test]
async fn missing_file_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/deploy/contents/gone.yaml"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
        .mount(&server)
        .await;

    let err = source(&server, None).fetch_at_ref(&repo(), "gone.yaml", "c2").await.unwrap_err();

    match err {
        FetchError::NotFound { path, git_ref } => {
            assert_eq!(path, "gone.yaml");
            assert_eq!(git_ref, "c2");
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn server_errors_are_http_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/deploy/contents/a.yaml"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = source(&server, None).fetch_at_ref(&repo(), "a.yaml", "c2").await.unwrap_err();

    assert!(matches!(err, FetchError::Http(ref m) if m.contains("502")), "{:?}", err);
}

#[tokio::test]
async fn token_is_sent_as_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/deploy/contents/a.yaml"))
        .and(header("authorization", "Bearer t0k3n"))
        .respond_with(ResponseTemplate::new(200).set_body_json(file_json(BODY)))
        .expect(1)
        .mount(&server)
        .await;

    let bytes = source(&server, Some("t0k3n")).fetch_at_ref(&repo(), "a.yaml", "c2").await.unwrap();

    assert_eq!(bytes, BODY.as_bytes());
}

#[tokio::test]
async fn removed_file_is_read_at_parent_of_hinted_commit() {
    let server = MockServer::start().await;
    mount_commit(&server, "c2", "c1", json!([{ "filename": "b.yaml", "status": "removed" }])).await;
    mount_file(&server, "b.yaml", "c1", BODY).await;

    let bytes = source(&server, None).fetch_before_removal(&repo(), "b.yaml", Some("c2")).await.unwrap();

    assert_eq!(bytes, BODY.as_bytes());
}

#[tokio::test]
async fn history_is_scanned_without_hint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/deploy/commits"))
        .and(query_param("per_page", "30"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "sha": "c3" }, { "sha": "c2" }, { "sha": "c1" }])))
        .expect(1)
        .mount(&server)
        .await;
    mount_commit(&server, "c3", "c2", json!([{ "filename": "b.yaml", "status": "modified" }])).await;
    mount_commit(&server, "c2", "c1", json!([{ "filename": "b.yaml", "status": "removed" }])).await;
    mount_file(&server, "b.yaml", "c1", BODY).await;

    let bytes = source(&server, None).fetch_before_removal(&repo(), "b.yaml", None).await.unwrap();

    assert_eq!(bytes, BODY.as_bytes());
}

#[tokio::test]
async fn no_removing_commit_in_history_is_removal_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/deploy/commits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "sha": "c2" }, { "sha": "c1" }])))
        .mount(&server)
        .await;
    mount_commit(&server, "c2", "c1", json!([{ "filename": "a.yaml", "status": "added" }])).await;
    mount_commit(&server, "c1", "c0", json!([])).await;

    let err = source(&server, None).fetch_before_removal(&repo(), "b.yaml", None).await.unwrap_err();

    assert!(matches!(err, FetchError::RemovalNotFound { ref path } if path == "b.yaml"), "{:?}", err);
}

#[tokio::test]
async fn unknown_hinted_commit_is_removal_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/deploy/commits/feed"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = source(&server, None).fetch_before_removal(&repo(), "b.yaml", Some("feed")).await.unwrap_err();

    assert!(matches!(err, FetchError::RemovalNotFound { .. }), "{:?}", err);
}
