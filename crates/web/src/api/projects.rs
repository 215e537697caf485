//! Project registration endpoints.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::info;

use sandsync_core::models::ProjectRecord;

use crate::api::status::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterProjectRequest {
    pub id: String,
    pub name: String,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/projects", get(list_projects).post(register_project))
        .route("/api/projects/:id", get(get_project))
}

async fn list_projects(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ProjectRecord>>, AppError> {
    Ok(Json(state.service.list_projects()?))
}

async fn register_project(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterProjectRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ProjectRecord>), AppError> {
    let Json(body) = payload?;
    let project = state.service.register_project(&body.id, &body.name)?;
    info!(project = %project.id, "project registered via API");
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProjectRecord>, AppError> {
    Ok(Json(state.service.get_project(&id)?))
}
