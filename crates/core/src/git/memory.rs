//! In-process Git host implementing [`RemoteRepository`].
//!
//! Objects are content-addressed and immutable, refs move only through
//! `update_ref`, and `create_tree` merges onto its base tree the way the
//! GitHub API does. Every call is recorded with the (tokio) instant it was
//! made, and individual operations can be made to fail.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::debug;

use super::RemoteRepository;
use crate::errors::RemoteError;
use crate::models::{CommitRecord, NewTreeEntry, RepositoryRef, TreeEntry, DEFAULT_BRANCH};

/// A recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    ResolveById(String),
    ResolveByName(String),
    GetHeadCommit(String),
    GetTree(String),
    ReadBlob(String),
    CreateBlob(String),
    CreateTree(String),
    CreateCommit(String),
    UpdateRef(String),
    CreateRepository(String),
    DeleteRepository(String),
}

/// An operation that should fail the next time (or the n-th time) it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailPoint {
    /// The n-th `create_blob` call, counted from 1 across the remote's life.
    CreateBlob(usize),
    CreateTree,
    CreateCommit,
    UpdateRef,
    GetHeadCommit,
    ResolveById,
    /// The next tree listing comes back truncated.
    TruncatedTree,
}

#[derive(Debug)]
struct RepoState {
    info: RepositoryRef,
    head: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    repos: HashMap<String, RepoState>,
    blobs: HashMap<String, Vec<u8>>,
    trees: HashMap<String, BTreeMap<String, String>>,
    commits: HashMap<String, CommitRecord>,
    next_repo_id: u64,
    blob_calls: usize,
    calls: Vec<(RemoteCall, Instant)>,
    fail_points: Vec<FailPoint>,
}

/// Process-local Git host.
#[derive(Debug)]
pub struct InMemoryRemote {
    owner: String,
    state: Mutex<State>,
}

impl InMemoryRemote {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            state: Mutex::new(State {
                next_repo_id: 1000,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an empty repository (no commits, branch not initialised).
    pub fn add_repository(&self, name: &str) -> RepositoryRef {
        let mut state = self.state();
        state.next_repo_id += 1;
        let info = RepositoryRef {
            id: state.next_repo_id.to_string(),
            owner: self.owner.clone(),
            name: name.to_string(),
            default_branch: DEFAULT_BRANCH.to_string(),
            html_url: format!("https://github.test/{}/{}", self.owner, name),
        };
        state.repos.insert(
            info.id.clone(),
            RepoState {
                info: info.clone(),
                head: None,
            },
        );
        info
    }

    /// Commit a full snapshot (no base tree) directly onto the default
    /// branch, as if pushed by another client.
    pub fn seed_commit<C: AsRef<[u8]>>(
        &self,
        repo: &RepositoryRef,
        files: &[(&str, C)],
        message: &str,
    ) -> CommitRecord {
        let mut state = self.state();
        let mut tree = BTreeMap::new();
        for (path, content) in files {
            let sha = store_blob(&mut state, content.as_ref());
            tree.insert(path.to_string(), sha);
        }
        let tree_sha = store_tree(&mut state, tree);
        let parent = state.repos.get(&repo.id).and_then(|r| r.head.clone());
        let commit = store_commit(&mut state, &tree_sha, parent.as_deref(), message);
        if let Some(r) = state.repos.get_mut(&repo.id) {
            r.head = Some(commit.sha.clone());
        }
        commit
    }

    /// Current head SHA of the default branch.
    pub fn head_sha(&self, repo: &RepositoryRef) -> Option<String> {
        self.state()
            .repos
            .get(&repo.id)
            .and_then(|r| r.head.clone())
    }

    /// The text files at the head of the default branch.
    pub fn files_at_head(&self, repo: &RepositoryRef) -> BTreeMap<String, String> {
        let state = self.state();
        let Some(head) = state.repos.get(&repo.id).and_then(|r| r.head.clone()) else {
            return BTreeMap::new();
        };
        let Some(tree_sha) = state.commits.get(&head).map(|c| c.tree_sha.clone()) else {
            return BTreeMap::new();
        };
        state
            .trees
            .get(&tree_sha)
            .map(|tree| {
                tree.iter()
                    .filter_map(|(path, sha)| {
                        let bytes = state.blobs.get(sha)?;
                        Some((path.clone(), String::from_utf8_lossy(bytes).into_owned()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Commit objects stored for any repository, including unreferenced ones.
    pub fn commit_count(&self) -> usize {
        self.state().commits.len()
    }

    pub fn repository_exists(&self, repo_id: &str) -> bool {
        self.state().repos.contains_key(repo_id)
    }

    pub fn fail_at(&self, point: FailPoint) {
        self.state().fail_points.push(point);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn timed_calls(&self) -> Vec<(RemoteCall, Instant)> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn record(&self, call: RemoteCall) {
        debug!(?call, "in-memory remote call");
        self.state().calls.push((call, Instant::now()));
    }

    fn take_fail_point(&self, point: &FailPoint) -> bool {
        let mut state = self.state();
        match state.fail_points.iter().position(|p| p == point) {
            Some(idx) => {
                state.fail_points.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Consume a matching fail point, if one is armed.
    fn check_fail(&self, point: &FailPoint) -> Result<(), RemoteError> {
        if self.take_fail_point(point) {
            return Err(RemoteError::Unavailable(format!(
                "injected failure at {:?}",
                point
            )));
        }
        Ok(())
    }

    fn repo_state<'a>(
        state: &'a State,
        repo: &RepositoryRef,
    ) -> Result<&'a RepoState, RemoteError> {
        state
            .repos
            .get(&repo.id)
            .ok_or_else(|| RemoteError::NotFound(format!("repository {}", repo.full_name())))
    }
}

fn object_sha(kind: &str, bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(bytes);
    let digest = hex::encode(hasher.finalize());
    digest[..40].to_string()
}

fn store_blob(state: &mut State, content: &[u8]) -> String {
    let sha = object_sha("blob", content);
    state.blobs.entry(sha.clone()).or_insert_with(|| content.to_vec());
    sha
}

fn store_tree(state: &mut State, tree: BTreeMap<String, String>) -> String {
    let mut canonical = Vec::new();
    for (path, sha) in &tree {
        canonical.extend_from_slice(path.as_bytes());
        canonical.push(0);
        canonical.extend_from_slice(sha.as_bytes());
        canonical.push(b'\n');
    }
    let sha = object_sha("tree", &canonical);
    state.trees.entry(sha.clone()).or_insert(tree);
    sha
}

fn store_commit(
    state: &mut State,
    tree_sha: &str,
    parent: Option<&str>,
    message: &str,
) -> CommitRecord {
    let author_date = Utc::now();
    let payload = format!(
        "tree {}\nparent {}\ndate {}\nseq {}\n\n{}",
        tree_sha,
        parent.unwrap_or(""),
        author_date.to_rfc3339(),
        state.commits.len(),
        message
    );
    let commit = CommitRecord {
        sha: object_sha("commit", payload.as_bytes()),
        message: message.to_string(),
        author_date,
        tree_sha: tree_sha.to_string(),
    };
    state.commits.insert(commit.sha.clone(), commit.clone());
    commit
}

#[async_trait]
impl RemoteRepository for InMemoryRemote {
    async fn resolve_by_id(&self, repo_id: &str) -> Result<Option<RepositoryRef>, RemoteError> {
        self.record(RemoteCall::ResolveById(repo_id.to_string()));
        self.check_fail(&FailPoint::ResolveById)?;
        Ok(self.state().repos.get(repo_id).map(|r| r.info.clone()))
    }

    async fn resolve_by_name(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<RepositoryRef>, RemoteError> {
        self.record(RemoteCall::ResolveByName(format!("{}/{}", owner, name)));
        Ok(self
            .state()
            .repos
            .values()
            .find(|r| r.info.owner == owner && r.info.name == name)
            .map(|r| r.info.clone()))
    }

    async fn get_head_commit(&self, repo: &RepositoryRef) -> Result<CommitRecord, RemoteError> {
        self.record(RemoteCall::GetHeadCommit(repo.id.clone()));
        self.check_fail(&FailPoint::GetHeadCommit)?;
        let state = self.state();
        let head = Self::repo_state(&state, repo)?
            .head
            .clone()
            .ok_or_else(|| RemoteError::BranchNotFound {
                repo: repo.full_name(),
                branch: repo.default_branch.clone(),
            })?;
        state
            .commits
            .get(&head)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("commit {}", head)))
    }

    async fn get_tree_recursive(
        &self,
        repo: &RepositoryRef,
        tree_sha: &str,
    ) -> Result<Vec<TreeEntry>, RemoteError> {
        self.record(RemoteCall::GetTree(tree_sha.to_string()));
        if self.take_fail_point(&FailPoint::TruncatedTree) {
            return Err(RemoteError::TreeTruncated {
                tree_sha: tree_sha.to_string(),
            });
        }
        let state = self.state();
        Self::repo_state(&state, repo)?;
        let tree = state
            .trees
            .get(tree_sha)
            .ok_or_else(|| RemoteError::NotFound(format!("tree {}", tree_sha)))?;

        let mut entries = Vec::new();
        let mut seen_dirs = std::collections::BTreeSet::new();
        for (path, sha) in tree {
            let mut prefix = String::new();
            let segments: Vec<&str> = path.split('/').collect();
            for segment in &segments[..segments.len() - 1] {
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(segment);
                if seen_dirs.insert(prefix.clone()) {
                    entries.push(TreeEntry {
                        path: prefix.clone(),
                        blob_sha: object_sha("dir", prefix.as_bytes()),
                        is_file: false,
                    });
                }
            }
            entries.push(TreeEntry {
                path: path.clone(),
                blob_sha: sha.clone(),
                is_file: true,
            });
        }
        Ok(entries)
    }

    async fn read_blob(
        &self,
        repo: &RepositoryRef,
        blob_sha: &str,
    ) -> Result<Vec<u8>, RemoteError> {
        self.record(RemoteCall::ReadBlob(blob_sha.to_string()));
        let state = self.state();
        Self::repo_state(&state, repo)?;
        state
            .blobs
            .get(blob_sha)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("blob {}", blob_sha)))
    }

    async fn create_blob(
        &self,
        repo: &RepositoryRef,
        content: &str,
    ) -> Result<String, RemoteError> {
        let nth = {
            let mut state = self.state();
            state.blob_calls += 1;
            state.blob_calls
        };
        self.record(RemoteCall::CreateBlob(object_sha("blob", content.as_bytes())));
        self.check_fail(&FailPoint::CreateBlob(nth))?;
        let mut state = self.state();
        Self::repo_state(&state, repo)?;
        Ok(store_blob(&mut state, content.as_bytes()))
    }

    async fn create_tree(
        &self,
        repo: &RepositoryRef,
        base_tree_sha: &str,
        entries: &[NewTreeEntry],
    ) -> Result<String, RemoteError> {
        self.record(RemoteCall::CreateTree(base_tree_sha.to_string()));
        self.check_fail(&FailPoint::CreateTree)?;
        let mut state = self.state();
        Self::repo_state(&state, repo)?;
        let mut tree = state
            .trees
            .get(base_tree_sha)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("tree {}", base_tree_sha)))?;
        for entry in entries {
            if !state.blobs.contains_key(&entry.blob_sha) {
                return Err(RemoteError::ApiError {
                    status: 422,
                    body: format!("blob {} does not exist", entry.blob_sha),
                });
            }
            tree.insert(entry.path.clone(), entry.blob_sha.clone());
        }
        Ok(store_tree(&mut state, tree))
    }

    async fn create_commit(
        &self,
        repo: &RepositoryRef,
        tree_sha: &str,
        parent_sha: &str,
        message: &str,
    ) -> Result<CommitRecord, RemoteError> {
        self.record(RemoteCall::CreateCommit(tree_sha.to_string()));
        self.check_fail(&FailPoint::CreateCommit)?;
        let mut state = self.state();
        Self::repo_state(&state, repo)?;
        if !state.trees.contains_key(tree_sha) {
            return Err(RemoteError::NotFound(format!("tree {}", tree_sha)));
        }
        if !state.commits.contains_key(parent_sha) {
            return Err(RemoteError::NotFound(format!("commit {}", parent_sha)));
        }
        Ok(store_commit(&mut state, tree_sha, Some(parent_sha), message))
    }

    async fn update_ref(&self, repo: &RepositoryRef, commit_sha: &str) -> Result<(), RemoteError> {
        self.record(RemoteCall::UpdateRef(commit_sha.to_string()));
        self.check_fail(&FailPoint::UpdateRef)?;
        let mut state = self.state();
        if !state.commits.contains_key(commit_sha) {
            return Err(RemoteError::ApiError {
                status: 422,
                body: format!("object {} does not exist", commit_sha),
            });
        }
        let repo_state = state
            .repos
            .get_mut(&repo.id)
            .ok_or_else(|| RemoteError::NotFound(format!("repository {}", repo.full_name())))?;
        repo_state.head = Some(commit_sha.to_string());
        Ok(())
    }

    async fn create_repository(&self, name: &str) -> Result<RepositoryRef, RemoteError> {
        self.record(RemoteCall::CreateRepository(name.to_string()));
        let exists = self
            .state()
            .repos
            .values()
            .any(|r| r.info.owner == self.owner && r.info.name == name);
        if exists {
            return Err(RemoteError::ApiError {
                status: 422,
                body: format!("name already exists on this account: {}", name),
            });
        }
        let info = self.add_repository(name);
        self.seed_commit::<&str>(&info, &[], "Initial commit");
        Ok(info)
    }

    async fn delete_repository(&self, repo: &RepositoryRef) -> Result<(), RemoteError> {
        self.record(RemoteCall::DeleteRepository(repo.id.clone()));
        self.state()
            .repos
            .remove(&repo.id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(format!("repository {}", repo.full_name())))
    }

    async fn owner(&self) -> Result<String, RemoteError> {
        Ok(self.owner.clone())
    }
}
