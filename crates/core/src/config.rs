//! TOML-based configuration system for sandsync.
//!
//! Sensitive values (the GitHub token) are stored as `_env` fields that
//! reference environment variable names. The actual secrets are resolved at
//! runtime via [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Process settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// GitHub API settings.
    pub github: GitHubConfig,

    /// Where sandbox project directories are mounted.
    pub sandbox: SandboxConfig,

    /// Sync protocol tuning.
    #[serde(default)]
    pub sync: SyncConfig,

    /// HTTP API settings.
    #[serde(default)]
    pub web: WebConfig,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for persistent data (the project database).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/sandsync")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl DaemonConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("sandsync.db")
    }
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// GitHub API base URL (default `https://api.github.com`).
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// Environment variable holding the GitHub access token.
    pub token_env: String,

    /// Account that owns created repositories. When unset, the authenticated
    /// user is looked up on first use.
    #[serde(default)]
    pub owner: Option<String>,

    /// Create repositories as private.
    #[serde(default = "default_true")]
    pub private_repos: bool,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_github_api_url() -> String {
    "https://api.github.com".into()
}
fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Sandbox filesystem
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Absolute directory containing one subdirectory per project id.
    pub root: PathBuf,

    /// Owner applied to every file after a pull, as `uid:gid`.
    #[serde(default)]
    pub file_owner: Option<String>,
}

impl SandboxConfig {
    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.root.join(project_id)
    }

    /// Parse `file_owner` into a `(uid, gid)` pair.
    pub fn ownership(&self) -> Result<Option<(u32, u32)>, ConfigError> {
        let Some(owner) = self.file_owner.as_deref() else {
            return Ok(None);
        };
        let invalid = || ConfigError::InvalidValue {
            field: "sandbox.file_owner".into(),
            detail: format!("expected 'uid:gid', got '{}'", owner),
        };
        let (uid, gid) = owner.split_once(':').ok_or_else(invalid)?;
        let uid = uid.trim().parse().map_err(|_| invalid())?;
        let gid = gid.trim().parse().map_err(|_| invalid())?;
        Ok(Some((uid, gid)))
    }
}

// ---------------------------------------------------------------------------
// Sync behaviour
// ---------------------------------------------------------------------------

/// What the commit collector does with files whose content is empty.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmptyFilePolicy {
    /// Leave empty files out of commits.
    #[default]
    Skip,
    /// Commit empty files as empty blobs.
    Keep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Number of blob uploads per batch.
    #[serde(default = "default_blob_batch_size")]
    pub blob_batch_size: usize,

    /// Pause between blob upload batches, in milliseconds.
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,

    /// Empty file handling when collecting files for a commit.
    #[serde(default)]
    pub empty_files: EmptyFilePolicy,

    /// Message used when a commit request carries none.
    #[serde(default = "default_commit_message")]
    pub default_commit_message: String,
}

fn default_blob_batch_size() -> usize {
    7
}
fn default_batch_pause_ms() -> u64 {
    1000
}
fn default_commit_message() -> String {
    "Update from sandbox".into()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            blob_batch_size: default_blob_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
            empty_files: EmptyFilePolicy::default(),
            default_commit_message: default_commit_message(),
        }
    }
}

impl SyncConfig {
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

// ---------------------------------------------------------------------------
// Web
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Listen address (default `127.0.0.1:3000`).
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:3000".into()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables.
    ///
    /// A missing variable logs a warning but does not fail; use
    /// [`require_github_token`](Self::require_github_token) where the token
    /// is mandatory.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");
        self.github.token = resolve_optional_env(&self.github.token_env, "github.token_env");
        Ok(())
    }

    /// The resolved GitHub token, or an error naming the variable.
    pub fn require_github_token(&self) -> Result<&str, ConfigError> {
        self.github
            .token
            .as_deref()
            .ok_or_else(|| ConfigError::EnvVarMissing {
                var: self.github.token_env.clone(),
                field: "github.token_env".into(),
            })
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.github.api_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "github.api_url".into(),
                detail: "GitHub API URL must not be empty".into(),
            });
        }
        if self.github.token_env.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "github.token_env".into(),
                detail: "token environment variable name must not be empty".into(),
            });
        }
        if !self.sandbox.root.is_absolute() {
            return Err(ConfigError::InvalidValue {
                field: "sandbox.root".into(),
                detail: "sandbox root must be an absolute path".into(),
            });
        }
        self.sandbox.ownership()?;
        if self.sync.blob_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.blob_batch_size".into(),
                detail: "batch size must be > 0".into(),
            });
        }
        if self.sync.default_commit_message.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "sync.default_commit_message".into(),
                detail: "default commit message must not be empty".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
