//! Remote Git host capability.
//!
//! [`RemoteRepository`] is the only seam through which the sync engine talks
//! to a Git host. [`GitHubClient`] implements it over the GitHub REST "git
//! data" API; [`InMemoryRemote`] is an in-process host with call recording
//! and failure injection.

pub mod github;
pub mod memory;

use async_trait::async_trait;

use crate::errors::RemoteError;
use crate::models::{CommitRecord, NewTreeEntry, RepositoryRef, TreeEntry};

pub use github::GitHubClient;
pub use memory::{FailPoint, InMemoryRemote, RemoteCall};

/// Operations the sync engine needs from a hosted Git repository.
///
/// Lookups (`resolve_*`, `get_*`, `read_blob`) are safe to retry; the
/// creating calls are not idempotent at this layer.
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    /// Look a repository up by its opaque host id. `Ok(None)` when absent.
    async fn resolve_by_id(&self, repo_id: &str) -> Result<Option<RepositoryRef>, RemoteError>;

    /// Look a repository up by owner and name. `Ok(None)` when absent.
    async fn resolve_by_name(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<RepositoryRef>, RemoteError>;

    /// Read the default branch ref and the commit it points to.
    ///
    /// Fails with [`RemoteError::BranchNotFound`] when the branch has no
    /// commits yet.
    async fn get_head_commit(&self, repo: &RepositoryRef) -> Result<CommitRecord, RemoteError>;

    async fn get_tree_recursive(
        &self,
        repo: &RepositoryRef,
        tree_sha: &str,
    ) -> Result<Vec<TreeEntry>, RemoteError>;

    /// Read a blob's raw bytes, decoded from the host's transport encoding.
    async fn read_blob(&self, repo: &RepositoryRef, blob_sha: &str)
        -> Result<Vec<u8>, RemoteError>;

    async fn create_blob(&self, repo: &RepositoryRef, content: &str)
        -> Result<String, RemoteError>;

    /// Create a tree from `base_tree_sha` plus `entries`; paths not listed
    /// keep their base-tree blobs.
    async fn create_tree(
        &self,
        repo: &RepositoryRef,
        base_tree_sha: &str,
        entries: &[NewTreeEntry],
    ) -> Result<String, RemoteError>;

    async fn create_commit(
        &self,
        repo: &RepositoryRef,
        tree_sha: &str,
        parent_sha: &str,
        message: &str,
    ) -> Result<CommitRecord, RemoteError>;

    /// Move the default branch to `commit_sha`.
    async fn update_ref(&self, repo: &RepositoryRef, commit_sha: &str) -> Result<(), RemoteError>;

    /// Create a repository owned by the authenticated account. The default
    /// branch exists with one initial commit afterwards.
    async fn create_repository(&self, name: &str) -> Result<RepositoryRef, RemoteError>;

    async fn delete_repository(&self, repo: &RepositoryRef) -> Result<(), RemoteError>;

    /// Account that owns repositories created through this handle.
    async fn owner(&self) -> Result<String, RemoteError>;
}
