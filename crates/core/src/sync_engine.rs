//! Sandbox <-> GitHub synchronization engine.
//!
//! The [`SyncOrchestrator`] drives each sync cycle through a small state
//! machine:
//!
//! 1. Compare the caller's last synced SHA with the remote HEAD.
//! 2. Pull: fetch the remote snapshot, apply deletions and new files, and
//!    withhold conflicting files.
//! 3. Resolve: apply the caller's chosen side for each withheld file.
//! 4. Commit: upload blobs in paced batches, build one tree on top of the
//!    current HEAD, commit, then move the branch ref.
//!
//! Nothing is kept between cycles. The caller persists the last synced SHA
//! and serialises cycles for one project.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::conflict::{ConflictStager, SyncPlanner};
use crate::errors::{CommitStage, RemoteError, SyncError};
use crate::fs::ProjectFilesystem;
use crate::git::RemoteRepository;
use crate::models::{
    CommitRecord, ConflictResolution, FileEntry, NewTreeEntry, PullCheck, PullResult,
    RemoteSnapshot, RepositoryRef,
};

// ---------------------------------------------------------------------------
// Sync state machine
// ---------------------------------------------------------------------------

/// Phases of one sync cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Checking,
    PullReady,
    Pulling,
    PullComplete,
    AwaitingResolution,
    Committing,
    CommitComplete,
    CommitFailed,
}

impl SyncPhase {
    /// Whether `self -> next` is a legal step.
    pub fn can_transition_to(self, next: SyncPhase) -> bool {
        use SyncPhase::*;
        matches!(
            (self, next),
            (Idle, Checking)
                | (Checking, Idle)
                | (Checking, PullReady)
                | (PullReady, Pulling)
                | (Pulling, PullComplete)
                | (Pulling, AwaitingResolution)
                | (AwaitingResolution, PullComplete)
                | (Idle, Committing)
                | (Committing, CommitComplete)
                | (Committing, CommitFailed)
                | (PullComplete, Idle)
                | (CommitComplete, Idle)
                | (CommitFailed, Idle)
        )
    }

    /// Phases that hand control back to [`SyncPhase::Idle`].
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::PullComplete | Self::CommitComplete | Self::CommitFailed
        )
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Checking => write!(f, "checking"),
            Self::PullReady => write!(f, "pull_ready"),
            Self::Pulling => write!(f, "pulling"),
            Self::PullComplete => write!(f, "pull_complete"),
            Self::AwaitingResolution => write!(f, "awaiting_resolution"),
            Self::Committing => write!(f, "committing"),
            Self::CommitComplete => write!(f, "commit_complete"),
            Self::CommitFailed => write!(f, "commit_failed"),
        }
    }
}

/// Tracks the phase of one cycle and rejects illegal transitions.
#[derive(Debug)]
pub struct SyncCycle {
    id: Uuid,
    phase: SyncPhase,
}

impl SyncCycle {
    pub fn new() -> Self {
        Self::resume(SyncPhase::Idle)
    }

    /// Continue a cycle that an earlier request left in `phase`.
    pub fn resume(phase: SyncPhase) -> Self {
        Self {
            id: Uuid::new_v4(),
            phase,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn advance(&mut self, next: SyncPhase) -> Result<(), SyncError> {
        if !self.phase.can_transition_to(next) {
            return Err(SyncError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        info!(cycle = %self.id, from = %self.phase, to = %next, "sync phase");
        self.phase = next;
        Ok(())
    }

    /// Return a terminal phase to idle. No-op for non-terminal phases.
    pub fn finish(&mut self) -> Result<(), SyncError> {
        if self.phase.is_terminal() {
            self.advance(SyncPhase::Idle)?;
        }
        Ok(())
    }
}

impl Default for SyncCycle {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Outcome of [`SyncOrchestrator::pull`].
#[derive(Debug, Clone)]
pub struct PullOutcome {
    pub result: PullResult,
    /// The remote commit the pull was classified against.
    pub commit: CommitRecord,
    pub phase: SyncPhase,
}

/// Outcome of [`SyncOrchestrator::commit_and_push`].
#[derive(Debug, Clone)]
pub struct PushedCommit {
    pub repository: RepositoryRef,
    pub commit: CommitRecord,
}

/// Stateless driver of pull, resolve and commit cycles.
pub struct SyncOrchestrator {
    remote: Arc<dyn RemoteRepository>,
    batch_size: usize,
    batch_pause: Duration,
}

impl SyncOrchestrator {
    pub fn new(remote: Arc<dyn RemoteRepository>, config: &SyncConfig) -> Self {
        Self::with_batching(remote, config.blob_batch_size, config.batch_pause())
    }

    pub fn with_batching(
        remote: Arc<dyn RemoteRepository>,
        batch_size: usize,
        batch_pause: Duration,
    ) -> Self {
        Self {
            remote,
            batch_size: batch_size.max(1),
            batch_pause,
        }
    }

    pub fn remote(&self) -> &Arc<dyn RemoteRepository> {
        &self.remote
    }

    /// Resolve a repository by id, failing with
    /// [`SyncError::RepositoryNotFound`] when it no longer exists.
    pub async fn resolve_repository(&self, repo_id: &str) -> Result<RepositoryRef, SyncError> {
        self.remote
            .resolve_by_id(repo_id)
            .await?
            .ok_or_else(|| SyncError::RepositoryNotFound(repo_id.to_string()))
    }

    /// Compare `local_sha` with the remote HEAD.
    pub async fn check_if_pull_needed(
        &self,
        repo_id: &str,
        local_sha: Option<&str>,
    ) -> Result<PullCheck, SyncError> {
        let mut cycle = SyncCycle::new();
        cycle.advance(SyncPhase::Checking)?;

        let repo = self.resolve_repository(repo_id).await?;
        let head = self.remote.get_head_commit(&repo).await?;
        let needs_pull = local_sha != Some(head.sha.as_str());

        if needs_pull {
            cycle.advance(SyncPhase::PullReady)?;
        } else {
            cycle.advance(SyncPhase::Idle)?;
        }
        debug!(repo = %repo.full_name(), head = %head.sha, needs_pull, "checked remote head");

        Ok(PullCheck {
            needs_pull,
            latest_commit: Some(head.summary()),
        })
    }

    /// Read every file at the remote HEAD.
    ///
    /// Blobs that are not UTF-8 text are listed in
    /// [`RemoteSnapshot::binary_paths`] instead of `files`.
    pub async fn fetch_remote_snapshot(
        &self,
        repo: &RepositoryRef,
    ) -> Result<RemoteSnapshot, SyncError> {
        let commit = self.remote.get_head_commit(repo).await?;
        let entries = self.remote.get_tree_recursive(repo, &commit.tree_sha).await?;

        let mut files = Vec::new();
        let mut binary_paths = Vec::new();
        for entry in entries.into_iter().filter(|e| e.is_file) {
            let bytes = self.remote.read_blob(repo, &entry.blob_sha).await?;
            match String::from_utf8(bytes) {
                Ok(content) => files.push(FileEntry::new(entry.path, content)),
                Err(_) => {
                    debug!(path = %entry.path, "skipping binary blob");
                    binary_paths.push(entry.path);
                }
            }
        }

        info!(
            repo = %repo.full_name(),
            commit = %commit.sha,
            files = files.len(),
            binary = binary_paths.len(),
            "fetched remote snapshot"
        );
        Ok(RemoteSnapshot {
            commit,
            files,
            binary_paths,
        })
    }

    /// Apply `snapshot` to the sandbox.
    ///
    /// Deletions and new files are written before returning; conflicting
    /// files are left untouched and reported.
    pub async fn pull(
        &self,
        snapshot: RemoteSnapshot,
        fs: &dyn ProjectFilesystem,
    ) -> Result<PullOutcome, SyncError> {
        let mut cycle = SyncCycle::resume(SyncPhase::PullReady);
        cycle.advance(SyncPhase::Pulling)?;

        let local_paths = fs.list_paths().await?;
        let result = SyncPlanner::plan(&snapshot, &local_paths, fs).await?;

        if result.has_conflicts() {
            cycle.advance(SyncPhase::AwaitingResolution)?;
        } else {
            if !result.new_files.is_empty() {
                fix_permissions(fs).await;
            }
            cycle.advance(SyncPhase::PullComplete)?;
        }
        let phase = cycle.phase();
        cycle.finish()?;

        Ok(PullOutcome {
            result,
            commit: snapshot.commit,
            phase,
        })
    }

    /// Apply conflict resolutions withheld by an earlier pull.
    pub async fn resolve_conflicts(
        &self,
        resolutions: &[ConflictResolution],
        fs: &dyn ProjectFilesystem,
    ) -> Result<Vec<String>, SyncError> {
        let mut cycle = SyncCycle::resume(SyncPhase::AwaitingResolution);
        let written = ConflictStager::apply_resolutions(resolutions, fs).await?;
        cycle.advance(SyncPhase::PullComplete)?;
        cycle.finish()?;
        Ok(written)
    }

    /// Commit `files` on top of the current HEAD and move the branch to it.
    ///
    /// Blob uploads run sequentially in batches with a pause between
    /// batches. A blob failure aborts before any tree, commit or ref call.
    /// A failure after the uploads leaves the branch where it was.
    pub async fn commit_and_push(
        &self,
        repo_id: &str,
        files: &[FileEntry],
        message: &str,
    ) -> Result<PushedCommit, SyncError> {
        let mut cycle = SyncCycle::new();
        cycle.advance(SyncPhase::Committing)?;

        let result = self.do_commit(repo_id, files, message).await;
        match &result {
            Ok(pushed) => {
                info!(
                    cycle = %cycle.id(),
                    repo = %pushed.repository.full_name(),
                    sha = %pushed.commit.sha,
                    files = files.len(),
                    "pushed commit"
                );
                cycle.advance(SyncPhase::CommitComplete)?;
            }
            Err(e) => {
                warn!(cycle = %cycle.id(), error = %e, "commit failed");
                cycle.advance(SyncPhase::CommitFailed)?;
            }
        }
        cycle.finish()?;
        result
    }

    async fn do_commit(
        &self,
        repo_id: &str,
        files: &[FileEntry],
        message: &str,
    ) -> Result<PushedCommit, SyncError> {
        let repo = self.resolve_repository(repo_id).await?;

        let head = self
            .remote
            .get_head_commit(&repo)
            .await
            .map_err(|e| match e {
                RemoteError::BranchNotFound { repo, branch } => {
                    SyncError::BranchNotFound { repo, branch }
                }
                source => SyncError::CommitFailed {
                    stage: CommitStage::ReadingHead,
                    source,
                },
            })?;

        let entries = self.upload_blobs(&repo, files).await?;

        let tree_sha = self
            .remote
            .create_tree(&repo, &head.tree_sha, &entries)
            .await
            .map_err(commit_failed(CommitStage::CreatingTree))?;

        let commit = self
            .remote
            .create_commit(&repo, &tree_sha, &head.sha, message)
            .await
            .map_err(commit_failed(CommitStage::CreatingCommit))?;

        // The commit object exists now; if this fails it is simply orphaned.
        self.remote
            .update_ref(&repo, &commit.sha)
            .await
            .map_err(commit_failed(CommitStage::UpdatingRef))?;

        Ok(PushedCommit {
            repository: repo,
            commit,
        })
    }

    async fn upload_blobs(
        &self,
        repo: &RepositoryRef,
        files: &[FileEntry],
    ) -> Result<Vec<NewTreeEntry>, SyncError> {
        let mut entries = Vec::with_capacity(files.len());
        for (batch_no, batch) in files.chunks(self.batch_size).enumerate() {
            if batch_no > 0 {
                debug!(pause_ms = self.batch_pause.as_millis() as u64, "pausing between blob batches");
                tokio::time::sleep(self.batch_pause).await;
            }
            for file in batch {
                let blob_sha = self
                    .remote
                    .create_blob(repo, &file.content)
                    .await
                    .map_err(|source| SyncError::BlobUploadFailed {
                        path: file.path.clone(),
                        source,
                    })?;
                entries.push(NewTreeEntry {
                    path: file.path.clone(),
                    blob_sha,
                });
            }
            debug!(batch = batch_no + 1, size = batch.len(), "uploaded blob batch");
        }
        Ok(entries)
    }
}

fn commit_failed(stage: CommitStage) -> impl Fn(RemoteError) -> SyncError {
    move |source| SyncError::CommitFailed { stage, source }
}

async fn fix_permissions(fs: &dyn ProjectFilesystem) {
    if let Err(e) = fs.fix_permissions().await {
        warn!(error = %e, "permission fix after pull failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFilesystem;
    use crate::git::{FailPoint, InMemoryRemote, RemoteCall};

    fn orchestrator(remote: &Arc<InMemoryRemote>) -> SyncOrchestrator {
        SyncOrchestrator::with_batching(remote.clone(), 7, Duration::ZERO)
    }

    #[test]
    fn test_sync_phase_display() {
        assert_eq!(SyncPhase::Idle.to_string(), "idle");
        assert_eq!(SyncPhase::PullReady.to_string(), "pull_ready");
        assert_eq!(
            SyncPhase::AwaitingResolution.to_string(),
            "awaiting_resolution"
        );
        assert_eq!(SyncPhase::CommitFailed.to_string(), "commit_failed");
    }

    #[test]
    fn test_transitions() {
        let mut cycle = SyncCycle::new();
        cycle.advance(SyncPhase::Checking).unwrap();
        cycle.advance(SyncPhase::PullReady).unwrap();
        cycle.advance(SyncPhase::Pulling).unwrap();
        cycle.advance(SyncPhase::AwaitingResolution).unwrap();
        cycle.finish().unwrap();
        assert_eq!(cycle.phase(), SyncPhase::AwaitingResolution);
        cycle.advance(SyncPhase::PullComplete).unwrap();
        cycle.finish().unwrap();
        assert_eq!(cycle.phase(), SyncPhase::Idle);

        let err = cycle.advance(SyncPhase::Pulling).unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));
        assert!(!SyncPhase::Committing.can_transition_to(SyncPhase::PullComplete));
    }

    #[tokio::test]
    async fn test_check_if_pull_needed() {
        let remote = Arc::new(InMemoryRemote::new("alice"));
        let repo = remote.add_repository("app");
        let head = remote.seed_commit(&repo, &[("a.txt", "A")], "first");
        let orch = orchestrator(&remote);

        let check = orch.check_if_pull_needed(&repo.id, None).await.unwrap();
        assert!(check.needs_pull);
        assert_eq!(check.latest_commit.unwrap().sha, head.sha);

        let check = orch
            .check_if_pull_needed(&repo.id, Some(&head.sha))
            .await
            .unwrap();
        assert!(!check.needs_pull);

        let check = orch
            .check_if_pull_needed(&repo.id, Some("stale"))
            .await
            .unwrap();
        assert!(check.needs_pull);
    }

    #[tokio::test]
    async fn test_check_unknown_repository() {
        let remote = Arc::new(InMemoryRemote::new("alice"));
        let err = orchestrator(&remote)
            .check_if_pull_needed("404", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RepositoryNotFound(id) if id == "404"));
    }

    #[tokio::test]
    async fn test_check_empty_branch() {
        let remote = Arc::new(InMemoryRemote::new("alice"));
        let repo = remote.add_repository("empty");
        let err = orchestrator(&remote)
            .check_if_pull_needed(&repo.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::BranchNotFound { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_separates_binary_blobs() {
        let remote = Arc::new(InMemoryRemote::new("alice"));
        let repo = remote.add_repository("app");
        remote.seed_commit(
            &repo,
            &[
                ("docs/readme.md", b"hello".to_vec()),
                ("logo.png", vec![0x89, 0x50, 0xff, 0xfe]),
            ],
            "first",
        );

        let snap = orchestrator(&remote)
            .fetch_remote_snapshot(&repo)
            .await
            .unwrap();
        assert_eq!(snap.files, vec![FileEntry::new("docs/readme.md", "hello")]);
        assert_eq!(snap.binary_paths, vec!["logo.png"]);
    }

    #[tokio::test]
    async fn test_pull_reports_phase() {
        let remote = Arc::new(InMemoryRemote::new("alice"));
        let repo = remote.add_repository("app");
        remote.seed_commit(&repo, &[("a.txt", "theirs")], "first");
        let orch = orchestrator(&remote);

        let fs = MemoryFilesystem::with_files(&[("a.txt", "mine")]);
        let snap = orch.fetch_remote_snapshot(&repo).await.unwrap();
        let outcome = orch.pull(snap, &fs).await.unwrap();
        assert_eq!(outcome.phase, SyncPhase::AwaitingResolution);
        assert_eq!(outcome.result.conflicts.len(), 1);

        let fs = MemoryFilesystem::new();
        let snap = orch.fetch_remote_snapshot(&repo).await.unwrap();
        let outcome = orch.pull(snap, &fs).await.unwrap();
        assert_eq!(outcome.phase, SyncPhase::PullComplete);
        assert_eq!(fs.permission_fixes(), 1);
    }

    #[tokio::test]
    async fn test_commit_and_push() {
        let remote = Arc::new(InMemoryRemote::new("alice"));
        let repo = remote.add_repository("app");
        let first = remote.seed_commit(&repo, &[("keep.txt", "K"), ("a.txt", "A")], "first");
        remote.clear_calls();

        let commit = orchestrator(&remote)
            .commit_and_push(&repo.id, &[FileEntry::new("a.txt", "A2")], "edit")
            .await
            .unwrap()
            .commit;

        assert_eq!(remote.head_sha(&repo), Some(commit.sha.clone()));
        let files = remote.files_at_head(&repo);
        assert_eq!(files.get("a.txt").map(String::as_str), Some("A2"));
        assert_eq!(files.get("keep.txt").map(String::as_str), Some("K"));

        let calls = remote.calls();
        assert!(calls.contains(&RemoteCall::CreateTree(first.tree_sha)));
        assert_eq!(calls.last(), Some(&RemoteCall::UpdateRef(commit.sha)));
    }

    #[tokio::test]
    async fn test_commit_failure_after_blobs() {
        let remote = Arc::new(InMemoryRemote::new("alice"));
        let repo = remote.add_repository("app");
        let first = remote.seed_commit(&repo, &[("a.txt", "A")], "first");
        remote.fail_at(FailPoint::UpdateRef);
        let commits_before = remote.commit_count();

        let err = orchestrator(&remote)
            .commit_and_push(&repo.id, &[FileEntry::new("a.txt", "A2")], "edit")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::CommitFailed {
                stage: CommitStage::UpdatingRef,
                ..
            }
        ));
        // The commit object exists but the branch never moved to it.
        assert_eq!(remote.commit_count(), commits_before + 1);
        assert_eq!(remote.head_sha(&repo), Some(first.sha));
    }
}
