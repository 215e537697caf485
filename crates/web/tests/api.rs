//! HTTP-level tests for the sandsync REST API.
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot` against
//! an in-memory Git host, an in-memory database and a temporary sandbox
//! root.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use sandsync_core::config::{
    AppConfig, DaemonConfig, GitHubConfig, SandboxConfig, SyncConfig, WebConfig,
};
use sandsync_core::db::Database;
use sandsync_core::git::{InMemoryRemote, RemoteRepository};
use sandsync_core::service::ProjectSyncService;
use sandsync_web::WebServer;

struct TestApp {
    router: Router,
    remote: Arc<InMemoryRemote>,
    sandbox: TempDir,
}

fn test_app() -> TestApp {
    let sandbox = tempfile::tempdir().unwrap();
    let config = AppConfig {
        daemon: DaemonConfig::default(),
        github: GitHubConfig {
            api_url: "https://api.github.test".into(),
            token_env: "SANDSYNC_TEST_TOKEN".into(),
            owner: None,
            private_repos: true,
            token: None,
        },
        sandbox: SandboxConfig {
            root: sandbox.path().to_path_buf(),
            file_owner: None,
        },
        sync: SyncConfig {
            batch_pause_ms: 0,
            ..Default::default()
        },
        web: WebConfig::default(),
    };

    let remote = Arc::new(InMemoryRemote::new("alice"));
    let db = Database::in_memory().unwrap();
    db.initialize().unwrap();
    let service = Arc::new(ProjectSyncService::new(remote.clone(), db, &config.sync));
    let router = WebServer::new(config, service).unwrap().router();

    TestApp {
        router,
        remote,
        sandbox,
    }
}

async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn write_sandbox(app: &TestApp, project: &str, path: &str, content: &str) {
    let full = app.sandbox.path().join(project).join(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, content).unwrap();
}

fn read_sandbox(app: &TestApp, project: &str, path: &str) -> Option<String> {
    std::fs::read_to_string(app.sandbox.path().join(project).join(path)).ok()
}

#[tokio::test]
async fn test_health() {
    let app = test_app();
    let (status, body) = send(&app, "GET", "/api/status/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn test_unknown_project_is_404() {
    let app = test_app();
    let (status, body) = send(&app, "GET", "/api/projects/nope/repo/status", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn test_unlinked_project_is_409() {
    let app = test_app();
    let (status, _) = send(
        &app,
        "POST",
        "/api/projects",
        Some(json!({ "id": "p1", "name": "demo" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, "POST", "/api/projects/p1/repo/pull", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_register_rejects_blank_id() {
    let app = test_app();
    let (status, _) = send(
        &app,
        "POST",
        "/api/projects",
        Some(json!({ "id": " ", "name": "demo" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_full_repo_lifecycle() {
    let app = test_app();
    send(
        &app,
        "POST",
        "/api/projects",
        Some(json!({ "id": "p1", "name": "Demo" })),
    )
    .await;
    write_sandbox(&app, "p1", "notes.md", "v1");

    let (status, body) = send(&app, "POST", "/api/projects/p1/repo", None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["repo_url"], "https://github.test/alice/demo");

    let (status, _) = send(&app, "POST", "/api/projects/p1/repo", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = send(&app, "GET", "/api/projects/p1/repo/status", None).await;
    assert_eq!(body["needs_pull"], false);

    // Someone else edits upstream while the sandbox edits locally.
    let repo = app
        .remote
        .resolve_by_name("alice", "demo")
        .await
        .unwrap()
        .unwrap();
    app.remote
        .seed_commit(&repo, &[("notes.md", "v2 remote"), ("extra.txt", "x")], "remote");
    write_sandbox(&app, "p1", "notes.md", "v2 local");

    let (_, body) = send(&app, "GET", "/api/projects/p1/repo/status", None).await;
    assert_eq!(body["needs_pull"], true);

    let (status, body) = send(&app, "POST", "/api/projects/p1/repo/pull", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["new_files"], json!(["extra.txt"]));
    assert_eq!(body["conflicts"][0]["path"], "notes.md");
    assert_eq!(body["conflicts"][0]["local_content"], "v2 local");
    assert_eq!(read_sandbox(&app, "p1", "notes.md").as_deref(), Some("v2 local"));
    let pulled_sha = body["commit_sha"].clone();
    assert!(pulled_sha.is_string());

    let mut resolution = body["conflicts"][0].clone();
    resolution["resolution"] = json!("local");
    let (status, body) = send(
        &app,
        "POST",
        "/api/projects/p1/repo/resolve-conflicts",
        Some(json!({ "commit_sha": pulled_sha, "resolutions": [resolution] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = send(
        &app,
        "POST",
        "/api/projects/p1/repo/commit",
        Some(json!({ "message": "keep my notes" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.remote.head_sha(&repo).as_deref(), body["commit_sha"].as_str());
    assert_eq!(
        app.remote.files_at_head(&repo).get("notes.md").map(String::as_str),
        Some("v2 local")
    );

    let (_, body) = send(&app, "GET", "/api/projects/p1/repo/history?limit=2", None).await;
    assert_eq!(body[0]["action"], "commit");
    assert_eq!(body[1]["action"], "resolve_conflicts");

    let (status, body) = send(&app, "DELETE", "/api/projects/p1/repo", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(!app.remote.repository_exists(&repo.id));

    let (status, _) = send(&app, "GET", "/api/projects/p1/repo/status", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_malformed_resolve_request_is_400() {
    let app = test_app();
    send(
        &app,
        "POST",
        "/api/projects",
        Some(json!({ "id": "p1", "name": "Demo" })),
    )
    .await;
    write_sandbox(&app, "p1", "notes.md", "v1");
    send(&app, "POST", "/api/projects/p1/repo", None).await;

    let repo = app
        .remote
        .resolve_by_name("alice", "demo")
        .await
        .unwrap()
        .unwrap();
    app.remote.seed_commit(&repo, &[("notes.md", "v2 remote")], "remote");
    write_sandbox(&app, "p1", "notes.md", "v2 local");

    let (_, pulled) = send(&app, "POST", "/api/projects/p1/repo/pull", None).await;
    let mut resolution = pulled["conflicts"][0].clone();
    resolution["resolution"] = json!("theirs");

    let (status, body) = send(
        &app,
        "POST",
        "/api/projects/p1/repo/resolve-conflicts",
        Some(json!({ "commit_sha": pulled["commit_sha"], "resolutions": [resolution] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    resolution["resolution"] = json!("incoming");
    let (status, _) = send(
        &app,
        "POST",
        "/api/projects/p1/repo/resolve-conflicts",
        Some(json!({ "resolutions": [resolution] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/api/projects/p1/repo/commit",
        Some(json!({ "message": 42 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(read_sandbox(&app, "p1", "notes.md").as_deref(), Some("v2 local"));
    let (_, body) = send(&app, "GET", "/api/projects/p1/repo/status", None).await;
    assert_eq!(body["needs_pull"], true);
}
