//! sandsync core library.
//!
//! This crate provides the foundational components for keeping sandbox
//! projects in sync with GitHub repositories: configuration, database
//! persistence, the remote repository and project filesystem capabilities,
//! pull planning and conflict staging, and the sync engine.

pub mod collector;
pub mod config;
pub mod conflict;
pub mod db;
pub mod errors;
pub mod fs;
pub mod git;
pub mod models;
pub mod service;
pub mod sync_engine;

// Re-exports for convenience.
pub use config::AppConfig;
pub use db::Database;
pub use fs::{LocalFilesystem, ProjectFilesystem};
pub use git::{GitHubClient, RemoteRepository};
pub use service::ProjectSyncService;
pub use sync_engine::SyncOrchestrator;
