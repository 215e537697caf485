//! Repository sync endpoints for one project.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::info;

use sandsync_core::db::AuditLogEntry;
use sandsync_core::models::{ConflictResolution, PullCheck, PullResult};
use sandsync_core::service::{
    CommitResponse, CreateRepoResponse, RemoveRepoResponse, ResolveResponse,
};

use crate::api::status::AppError;
use crate::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ResolveConflictsRequest {
    /// `commit_sha` from the pull that produced the conflicts.
    pub commit_sha: String,
    pub resolutions: Vec<ConflictResolution>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommitRequest {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/projects/:id/repo",
            post(create_repo).delete(remove_repo),
        )
        .route("/api/projects/:id/repo/status", get(repo_status))
        .route("/api/projects/:id/repo/pull", post(pull))
        .route(
            "/api/projects/:id/repo/resolve-conflicts",
            post(resolve_conflicts),
        )
        .route("/api/projects/:id/repo/commit", post(commit))
        .route("/api/projects/:id/repo/history", get(history))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn repo_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PullCheck>, AppError> {
    Ok(Json(state.service.check_if_pull_needed(&id).await?))
}

async fn pull(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PullResult>, AppError> {
    let fs = state.filesystem(&id);
    let result = state.service.pull(&id, &fs).await?;
    info!(
        project = %id,
        new = result.new_files.len(),
        deleted = result.deleted_files.len(),
        conflicts = result.conflicts.len(),
        "pull finished"
    );
    Ok(Json(result))
}

async fn resolve_conflicts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<ResolveConflictsRequest>, JsonRejection>,
) -> Result<Json<ResolveResponse>, AppError> {
    let Json(body) = payload?;
    let fs = state.filesystem(&id);
    let response = state
        .service
        .resolve_conflicts(&id, &fs, &body.commit_sha, &body.resolutions)
        .await?;
    Ok(Json(response))
}

async fn commit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<CommitRequest>, JsonRejection>,
) -> Result<Json<CommitResponse>, AppError> {
    let Json(body) = payload?;
    let fs = state.filesystem(&id);
    let response = state
        .service
        .commit(&id, &fs, body.message.as_deref())
        .await?;
    info!(project = %id, sha = %response.commit_sha, "commit pushed");
    Ok(Json(response))
}

async fn create_repo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<CreateRepoResponse>), AppError> {
    let fs = state.filesystem(&id);
    let response = state.service.create_repo(&id, &fs).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn remove_repo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RemoveRepoResponse>, AppError> {
    Ok(Json(state.service.remove_repo(&id).await?))
}

async fn history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<AuditLogEntry>>, AppError> {
    let limit = query.limit.unwrap_or(20).min(200);
    Ok(Json(state.service.history(&id, limit)?))
}
