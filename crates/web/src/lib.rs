//! sandsync web server and REST API.
//!
//! Provides an Axum-based HTTP server with:
//! - Status and health endpoints
//! - Project registration
//! - Repository sync endpoints (status, pull, conflict resolution, commit,
//!   repository creation and removal, history)

pub mod api;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use sandsync_core::config::AppConfig;
use sandsync_core::fs::LocalFilesystem;
use sandsync_core::service::ProjectSyncService;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub service: Arc<ProjectSyncService>,
    pub config: AppConfig,
    /// Parsed `sandbox.file_owner`.
    pub ownership: Option<(u32, u32)>,
}

impl AppState {
    /// The sandbox filesystem of one project.
    pub fn filesystem(&self, project_id: &str) -> LocalFilesystem {
        LocalFilesystem::new(self.project_dir(project_id)).with_ownership(self.ownership)
    }

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.config.sandbox.project_dir(project_id)
    }
}

/// The web server.
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a new web server with the given dependencies.
    pub fn new(config: AppConfig, service: Arc<ProjectSyncService>) -> anyhow::Result<Self> {
        let ownership = config.sandbox.ownership()?;
        let state = Arc::new(AppState {
            service,
            config,
            ownership,
        });
        Ok(Self { state })
    }

    /// The application router with all API routes and middleware.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

        Router::new()
            .merge(api::status::routes())
            .merge(api::projects::routes())
            .merge(api::repo::routes())
            .layer(
                ServiceBuilder::new()
                    .layer(DefaultBodyLimit::max(16 * 1024 * 1024)) // conflict payloads carry file bodies
                    .layer(TraceLayer::new_for_http())
                    .layer(cors),
            )
            .with_state(self.state.clone())
    }

    /// Start the web server, listening on the given address, until
    /// `shutdown` resolves.
    pub async fn start(
        self,
        listen_addr: &str,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let addr: SocketAddr = listen_addr.parse()?;
        let app = self.router();

        info!(addr = %addr, "starting web server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
