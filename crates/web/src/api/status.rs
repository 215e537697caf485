//! Health check endpoint and the shared API error type.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::{error, warn};

use sandsync_core::errors::{FilesystemError, RemoteError, ServiceError, SyncError};

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: String,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/status/health", get(health_check))
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ---------------------------------------------------------------------------
// Shared error type for API handlers
// ---------------------------------------------------------------------------

/// Simple API error type that converts to an Axum response.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
    Internal(String),
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

/// Malformed or mistyped request bodies are the caller's fault.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::ProjectNotFound(_) => AppError::NotFound(message),
            ServiceError::NotLinked(_) | ServiceError::RepositoryAlreadyExists(_) => {
                AppError::Conflict(message)
            }
            ServiceError::InvalidRequest(_) => AppError::BadRequest(message),
            ServiceError::Sync(sync) => match sync {
                SyncError::RepositoryNotFound(_) => AppError::NotFound(message),
                SyncError::BranchNotFound { .. } => AppError::Conflict(message),
                SyncError::RemoteUnavailable(_)
                | SyncError::BlobUploadFailed { .. }
                | SyncError::CommitFailed { .. }
                | SyncError::Remote(RemoteError::TreeTruncated { .. }) => {
                    warn!(error = %message, "remote failure");
                    AppError::BadGateway(message)
                }
                SyncError::Filesystem(FilesystemError::InvalidPath(_)) => {
                    AppError::BadRequest(message)
                }
                _ => {
                    error!(error = %message, "sync error");
                    AppError::Internal(message)
                }
            },
            ServiceError::Database(_) => {
                error!(error = %message, "database error");
                AppError::Internal(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandsync_core::errors::CommitStage;

    fn status_of(err: ServiceError) -> StatusCode {
        use axum::response::IntoResponse;
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_of(ServiceError::ProjectNotFound("p".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(SyncError::RepositoryNotFound("1".into()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ServiceError::NotLinked("p".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(
                SyncError::BranchNotFound {
                    repo: "a/b".into(),
                    branch: "main".into()
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(
                SyncError::CommitFailed {
                    stage: CommitStage::UpdatingRef,
                    source: RemoteError::Unavailable("reset".into()),
                }
                .into()
            ),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(
                SyncError::Remote(RemoteError::TreeTruncated {
                    tree_sha: "t1".into()
                })
                .into()
            ),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(ServiceError::InvalidRequest("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(SyncError::Remote(RemoteError::Decode {
                sha: "x".into(),
                detail: "bad base64".into()
            })
            .into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
