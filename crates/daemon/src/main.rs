//! sandsync daemon entry point.
//!
//! Loads configuration, opens the project database, connects to GitHub and
//! serves the sync REST API until a shutdown signal arrives.

mod signals;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sandsync_core::config::AppConfig;
use sandsync_core::db::Database;
use sandsync_core::git::GitHubClient;
use sandsync_core::service::ProjectSyncService;
use sandsync_web::WebServer;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// sandsync HTTP daemon.
#[derive(Parser, Debug)]
#[command(
    name = "sandsync-daemon",
    version,
    about = "GitHub sync and conflict resolution service for sandbox projects"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config =
        AppConfig::load_and_resolve(&args.config).context("failed to load configuration")?;

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.daemon.log_level);
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    info!("========================================");
    info!("  sandsync daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", args.config.display());
    info!("GitHub API    : {}", config.github.api_url);
    info!(
        "Repo owner    : {}",
        config.github.owner.as_deref().unwrap_or("(token user)")
    );
    info!("Sandbox root  : {}", config.sandbox.root.display());
    info!("Web listen    : {}", config.web.listen);
    info!("Data dir      : {}", config.daemon.data_dir.display());
    info!("Log level     : {}", log_level);
    info!("========================================");

    let db_path = config.daemon.database_path();
    let db = Database::new(&db_path).context("failed to open database")?;
    db.initialize()
        .context("failed to initialize database schema")?;
    info!("Database initialized at {}", db_path.display());

    let token = config
        .require_github_token()
        .context("GitHub token is required")?;
    let mut github = GitHubClient::new(&config.github.api_url, token)
        .context("failed to build GitHub client")?
        .with_private_repos(config.github.private_repos);
    if let Some(owner) = &config.github.owner {
        github = github.with_owner(owner.clone());
    }
    info!("GitHub client initialized");

    let service = Arc::new(
        ProjectSyncService::new(Arc::new(github), db, &config.sync)
            .with_owner(config.github.owner.clone()),
    );

    let listen_addr = config.web.listen.clone();
    let server = WebServer::new(config, service).context("failed to build web server")?;
    server
        .start(&listen_addr, signals::wait_for_shutdown())
        .await
        .context("web server error")?;

    info!("sandsync daemon stopped.");
    Ok(())
}
