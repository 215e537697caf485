//! Error types for the sandsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Filesystem(#[from] FilesystemError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Remote repository errors
// ---------------------------------------------------------------------------

/// Errors from the remote Git host (GitHub REST API or an in-process host).
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The repository, commit, tree or blob does not exist.
    #[error("remote object not found: {0}")]
    NotFound(String),

    /// The default branch has never been initialised (no commits yet).
    #[error("branch '{branch}' not found in repository '{repo}'")]
    BranchNotFound { repo: String, branch: String },

    /// Transient network / host failure.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// HTTP-level transport error (network, TLS, etc.).
    #[error("GitHub HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("GitHub API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// Authentication token is missing or invalid.
    #[error("GitHub authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Rate limit exceeded.
    #[error("GitHub rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: String },

    /// The host returned only part of a recursive tree listing.
    #[error("tree {tree_sha} listing was truncated by the host")]
    TreeTruncated { tree_sha: String },

    /// Blob content could not be decoded from its transport encoding.
    #[error("failed to decode blob {sha}: {detail}")]
    Decode { sha: String, detail: String },
}

impl RemoteError {
    /// Whether the failure is transient and the whole operation may be retried
    /// by the caller.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::RateLimited { .. } => true,
            Self::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Sandbox filesystem errors
// ---------------------------------------------------------------------------

/// Errors from the project filesystem capability.
#[derive(Debug, Error)]
pub enum FilesystemError {
    /// A path escapes the project root or is otherwise unusable.
    #[error("invalid project path '{0}'")]
    InvalidPath(String),

    /// A file exists but is not valid UTF-8 text.
    #[error("file '{0}' is not valid UTF-8 text")]
    NotText(String),

    /// Ownership fix-up failed. Callers treat this as non-fatal.
    #[error("failed to fix permissions under '{path}': {detail}")]
    PermissionFixFailed { path: String, detail: String },

    /// Generic I/O wrapper.
    #[error("filesystem I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Errors from the pull / resolve / commit protocol.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The repository id or name does not resolve on the remote host.
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    /// The default branch has no commits yet.
    #[error("branch '{branch}' has no commits in repository '{repo}'")]
    BranchNotFound { repo: String, branch: String },

    /// Transient network / host failure, propagated without retry.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(#[source] RemoteError),

    /// Creating the blob for one file failed; the commit was aborted.
    #[error("blob upload failed for '{path}': {source}")]
    BlobUploadFailed {
        path: String,
        #[source]
        source: RemoteError,
    },

    /// A step after the blob uploads failed; the branch ref was not moved.
    #[error("commit failed while {stage}: {source}")]
    CommitFailed {
        stage: CommitStage,
        #[source]
        source: RemoteError,
    },

    /// A state-machine transition was invalid.
    #[error("invalid sync state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Non-transient remote failure outside the commit path.
    #[error("sync remote error: {0}")]
    Remote(RemoteError),

    /// Sandbox filesystem failure.
    #[error("sync filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::BranchNotFound { repo, branch } => Self::BranchNotFound { repo, branch },
            e if e.is_transient() => Self::RemoteUnavailable(e),
            e => Self::Remote(e),
        }
    }
}

/// The commit-path step that failed after blob uploads completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStage {
    ReadingHead,
    CreatingTree,
    CreatingCommit,
    UpdatingRef,
}

impl std::fmt::Display for CommitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadingHead => write!(f, "reading head"),
            Self::CreatingTree => write!(f, "creating tree"),
            Self::CreatingCommit => write!(f, "creating commit"),
            Self::UpdatingRef => write!(f, "updating ref"),
        }
    }
}

// ---------------------------------------------------------------------------
// Project service errors
// ---------------------------------------------------------------------------

/// Errors from the per-project service layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No project record with this id.
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// The project has no linked repository.
    #[error("project '{0}' is not linked to a repository")]
    NotLinked(String),

    /// A repository is already linked, or the name is taken remotely.
    #[error("repository '{0}' already exists")]
    RepositoryAlreadyExists(String),

    /// Bad caller input (empty ids, unknown resolution strings, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("service database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<RemoteError> for ServiceError {
    fn from(err: RemoteError) -> Self {
        Self::Sync(err.into())
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = SyncError::RepositoryNotFound("12345".into());
        assert_eq!(err.to_string(), "repository not found: 12345");

        let err = SyncError::BlobUploadFailed {
            path: "src/main.rs".into(),
            source: RemoteError::Unavailable("connection reset".into()),
        };
        assert!(err.to_string().contains("src/main.rs"));

        let err = SyncError::CommitFailed {
            stage: CommitStage::UpdatingRef,
            source: RemoteError::ApiError {
                status: 422,
                body: "not a fast forward".into(),
            },
        };
        assert!(err.to_string().contains("updating ref"));

        let err = ConfigError::EnvVarMissing {
            var: "GITHUB_TOKEN".into(),
            field: "github.token_env".into(),
        };
        assert!(err.to_string().contains("GITHUB_TOKEN"));
    }

    #[test]
    fn test_remote_error_classification() {
        let err: SyncError = RemoteError::BranchNotFound {
            repo: "alice/app".into(),
            branch: "main".into(),
        }
        .into();
        assert!(matches!(err, SyncError::BranchNotFound { .. }));

        let err: SyncError = RemoteError::Unavailable("timeout".into()).into();
        assert!(matches!(err, SyncError::RemoteUnavailable(_)));

        let err: SyncError = RemoteError::ApiError {
            status: 503,
            body: "HTTP 503".into(),
        }
        .into();
        assert!(matches!(err, SyncError::RemoteUnavailable(_)));

        let err: SyncError = RemoteError::ApiError {
            status: 422,
            body: "HTTP 422".into(),
        }
        .into();
        assert!(matches!(err, SyncError::Remote(_)));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let sync_err = SyncError::RepositoryNotFound("1".into());
        let core_err: CoreError = sync_err.into();
        assert!(matches!(core_err, CoreError::Sync(_)));

        let db_err = DatabaseError::NotFound {
            entity: "project".into(),
            id: "abc".into(),
        };
        let core_err: CoreError = CoreError::Database(db_err);
        assert!(matches!(core_err, CoreError::Database(_)));
    }
}
