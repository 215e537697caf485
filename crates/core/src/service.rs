//! Per-project sync service.
//!
//! [`ProjectSyncService`] is the surface consumed by the web API and the CLI.
//! It loads the project record, serialises operations per project, runs the
//! [`SyncOrchestrator`] and persists the repository link and synced SHA.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{info, instrument, warn};

use crate::collector::CommitCollector;
use crate::config::SyncConfig;
use crate::db::{AuditLogEntry, Database};
use crate::errors::{ServiceError, SyncError};
use crate::fs::ProjectFilesystem;
use crate::git::RemoteRepository;
use crate::models::{ConflictResolution, ProjectRecord, PullCheck, PullResult, RepositoryRef};
use crate::sync_engine::SyncOrchestrator;

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolveResponse {
    pub success: bool,
    /// Paths overwritten with the incoming content.
    pub overwritten: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitResponse {
    pub repo_url: String,
    pub commit_sha: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateRepoResponse {
    pub repo_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoveRepoResponse {
    pub success: bool,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Sync operations addressed by project id.
pub struct ProjectSyncService {
    orchestrator: SyncOrchestrator,
    collector: CommitCollector,
    db: Database,
    default_message: String,
    owner: Option<String>,
    locks: LockRegistry,
}

impl ProjectSyncService {
    pub fn new(remote: Arc<dyn RemoteRepository>, db: Database, config: &SyncConfig) -> Self {
        Self {
            orchestrator: SyncOrchestrator::new(remote, config),
            collector: CommitCollector::new(config.empty_files),
            db,
            default_message: config.default_commit_message.clone(),
            owner: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create repositories under `owner` instead of asking the remote who
    /// the authenticated account is.
    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner = owner;
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    // -----------------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------------

    pub fn register_project(&self, id: &str, name: &str) -> Result<ProjectRecord, ServiceError> {
        let id = id.trim();
        let name = name.trim();
        if id.is_empty() || name.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "project id and name must not be empty".into(),
            ));
        }
        if id.contains('/') || id.contains("..") {
            return Err(ServiceError::InvalidRequest(format!(
                "invalid project id '{}'",
                id
            )));
        }
        if self.db.get_project(id)?.is_some() {
            return Err(ServiceError::InvalidRequest(format!(
                "project '{}' is already registered",
                id
            )));
        }
        let project = self.db.insert_project(id, name)?;
        info!(project = id, name, "registered project");
        Ok(project)
    }

    pub fn get_project(&self, project_id: &str) -> Result<ProjectRecord, ServiceError> {
        self.db
            .get_project(project_id)?
            .ok_or_else(|| ServiceError::ProjectNotFound(project_id.to_string()))
    }

    pub fn list_projects(&self) -> Result<Vec<ProjectRecord>, ServiceError> {
        Ok(self.db.list_projects()?)
    }

    pub fn history(&self, project_id: &str, limit: u32) -> Result<Vec<AuditLogEntry>, ServiceError> {
        self.get_project(project_id)?;
        Ok(self.db.list_audit_log(project_id, limit)?)
    }

    // -----------------------------------------------------------------------
    // Sync operations
    // -----------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn check_if_pull_needed(&self, project_id: &str) -> Result<PullCheck, ServiceError> {
        let (project, repo_id) = self.linked_project(project_id)?;
        let check = self
            .orchestrator
            .check_if_pull_needed(&repo_id, project.last_commit.as_deref())
            .await?;
        Ok(check)
    }

    /// Pull the remote HEAD into `fs`. The synced SHA is recorded only when
    /// no conflicts are left for the caller to resolve.
    #[instrument(skip(self, fs))]
    pub async fn pull(
        &self,
        project_id: &str,
        fs: &dyn ProjectFilesystem,
    ) -> Result<PullResult, ServiceError> {
        let _guard = self.lock(project_id).await;
        let (_, repo_id) = self.linked_project(project_id)?;

        let outcome = async {
            let repo = self.orchestrator.resolve_repository(&repo_id).await?;
            let snapshot = self.orchestrator.fetch_remote_snapshot(&repo).await?;
            self.orchestrator.pull(snapshot, fs).await
        }
        .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.audit(project_id, "pull", None, &e.to_string(), false);
                return Err(e.into());
            }
        };

        let result = outcome.result;
        if !result.has_conflicts() {
            self.db.set_last_commit(project_id, &outcome.commit.sha)?;
        }
        self.audit(
            project_id,
            "pull",
            Some(&outcome.commit.sha),
            &format!(
                "{} new, {} deleted, {} conflicts",
                result.new_files.len(),
                result.deleted_files.len(),
                result.conflicts.len()
            ),
            true,
        );
        Ok(result)
    }

    /// Apply resolutions for conflicts returned by [`pull`](Self::pull) and
    /// record `commit_sha` as synced.
    ///
    /// `commit_sha` is the [`PullResult::commit_sha`] the conflicts came
    /// from. Recording it rather than the current HEAD keeps a push that
    /// landed after the pull visible to the next
    /// [`check_if_pull_needed`](Self::check_if_pull_needed).
    #[instrument(skip(self, fs, resolutions), fields(count = resolutions.len()))]
    pub async fn resolve_conflicts(
        &self,
        project_id: &str,
        fs: &dyn ProjectFilesystem,
        commit_sha: &str,
        resolutions: &[ConflictResolution],
    ) -> Result<ResolveResponse, ServiceError> {
        let commit_sha = commit_sha.trim();
        if commit_sha.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "commit_sha of the pull being resolved is required".into(),
            ));
        }
        if let Some(bad) = resolutions.iter().find(|r| r.path.trim().is_empty()) {
            return Err(ServiceError::InvalidRequest(format!(
                "resolution for '{}' has an empty path",
                bad.path
            )));
        }

        let _guard = self.lock(project_id).await;
        self.linked_project(project_id)?;

        let overwritten = match self.orchestrator.resolve_conflicts(resolutions, fs).await {
            Ok(overwritten) => overwritten,
            Err(e) => {
                self.audit(
                    project_id,
                    "resolve_conflicts",
                    Some(commit_sha),
                    &e.to_string(),
                    false,
                );
                return Err(e.into());
            }
        };

        self.db.set_last_commit(project_id, commit_sha)?;
        self.audit(
            project_id,
            "resolve_conflicts",
            Some(commit_sha),
            &format!("{} overwritten", overwritten.len()),
            true,
        );

        Ok(ResolveResponse {
            success: true,
            overwritten,
        })
    }

    /// Commit every sandbox file on top of the remote HEAD.
    #[instrument(skip(self, fs))]
    pub async fn commit(
        &self,
        project_id: &str,
        fs: &dyn ProjectFilesystem,
        message: Option<&str>,
    ) -> Result<CommitResponse, ServiceError> {
        let _guard = self.lock(project_id).await;
        let (_, repo_id) = self.linked_project(project_id)?;
        let message = message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.default_message.as_str());

        let files = self
            .collector
            .collect_all(fs)
            .await
            .map_err(SyncError::from)?;
        let pushed = match self
            .orchestrator
            .commit_and_push(&repo_id, &files, message)
            .await
        {
            Ok(pushed) => pushed,
            Err(e) => {
                self.audit(project_id, "commit", None, &e.to_string(), false);
                return Err(e.into());
            }
        };

        self.db.set_last_commit(project_id, &pushed.commit.sha)?;
        self.audit(
            project_id,
            "commit",
            Some(&pushed.commit.sha),
            &format!("{} files", files.len()),
            true,
        );
        Ok(CommitResponse {
            repo_url: pushed.repository.html_url,
            commit_sha: pushed.commit.sha,
        })
    }

    /// Create a repository named after the project, link it and push the
    /// project files as its first commit.
    ///
    /// The link is stored as soon as the repository exists, so a failed
    /// first commit can be retried with [`commit`](Self::commit).
    #[instrument(skip(self, fs))]
    pub async fn create_repo(
        &self,
        project_id: &str,
        fs: &dyn ProjectFilesystem,
    ) -> Result<CreateRepoResponse, ServiceError> {
        let _guard = self.lock(project_id).await;
        let project = self.get_project(project_id)?;
        let remote = self.orchestrator.remote();

        let outcome: Result<(RepositoryRef, String, usize), ServiceError> = async {
            if let Some(existing) = &project.repository_id {
                if let Some(repo) = remote.resolve_by_id(existing).await? {
                    return Err(ServiceError::RepositoryAlreadyExists(repo.full_name()));
                }
                warn!(project = project_id, repository = %existing, "linked repository is gone, relinking");
            }

            let owner = match &self.owner {
                Some(owner) => owner.clone(),
                None => remote.owner().await?,
            };
            let name = repository_name(&project.name, &project.id);
            if let Some(repo) = remote.resolve_by_name(&owner, &name).await? {
                return Err(ServiceError::RepositoryAlreadyExists(repo.full_name()));
            }

            let repo = remote.create_repository(&name).await?;
            self.db.link_repository(project_id, &repo.id, None)?;
            info!(project = project_id, repo = %repo.full_name(), "created repository");

            let files = self
                .collector
                .collect_all(fs)
                .await
                .map_err(SyncError::from)?;
            let sha = if files.is_empty() {
                remote
                    .get_head_commit(&repo)
                    .await
                    .map_err(SyncError::from)?
                    .sha
            } else {
                self.orchestrator
                    .commit_and_push(&repo.id, &files, &self.default_message)
                    .await?
                    .commit
                    .sha
            };
            self.db.set_last_commit(project_id, &sha)?;
            Ok((repo, sha, files.len()))
        }
        .await;

        let (repo, sha, file_count) = match outcome {
            Ok(created) => created,
            Err(e) => {
                self.audit(project_id, "create_repo", None, &e.to_string(), false);
                return Err(e);
            }
        };
        self.audit(
            project_id,
            "create_repo",
            Some(&sha),
            &format!("{} ({} files)", repo.full_name(), file_count),
            true,
        );

        Ok(CreateRepoResponse {
            repo_url: repo.html_url,
        })
    }

    /// Delete the linked repository if it still exists and unlink it.
    #[instrument(skip(self))]
    pub async fn remove_repo(&self, project_id: &str) -> Result<RemoveRepoResponse, ServiceError> {
        let _guard = self.lock(project_id).await;
        let (_, repo_id) = self.linked_project(project_id)?;
        let remote = self.orchestrator.remote();

        let outcome: Result<(), ServiceError> = async {
            match remote.resolve_by_id(&repo_id).await? {
                Some(repo) => {
                    remote.delete_repository(&repo).await?;
                    info!(project = project_id, repo = %repo.full_name(), "deleted repository");
                }
                None => warn!(project = project_id, repository = %repo_id, "repository already gone"),
            }
            self.db.clear_repository(project_id)?;
            Ok(())
        }
        .await;

        if let Err(e) = outcome {
            self.audit(
                project_id,
                "remove_repo",
                None,
                &format!("{}: {}", repo_id, e),
                false,
            );
            return Err(e);
        }
        self.audit(project_id, "remove_repo", None, &repo_id, true);
        Ok(RemoveRepoResponse { success: true })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn linked_project(&self, project_id: &str) -> Result<(ProjectRecord, String), ServiceError> {
        let project = self.get_project(project_id)?;
        let repo_id = project
            .repository_id
            .clone()
            .ok_or_else(|| ServiceError::NotLinked(project_id.to_string()))?;
        Ok((project, repo_id))
    }

    /// Serialise operations on one project.
    async fn lock(&self, project_id: &str) -> ProjectLock<'_> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(project_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        ProjectLock {
            registry: &self.locks,
            project_id: project_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    fn audit(&self, project_id: &str, action: &str, sha: Option<&str>, details: &str, success: bool) {
        if let Err(e) = self
            .db
            .insert_audit_log(project_id, action, sha, Some(details), success)
        {
            warn!(error = %e, project = project_id, action, "failed to write audit log");
        }
    }
}

type LockRegistry = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Held for the duration of one project operation.
///
/// On release the registry entry is dropped when nobody else holds or waits
/// on it, so the registry only holds projects with operations in flight. A
/// waiter cancelled mid-wait can leave its entry behind until the next
/// operation on that project finishes.
struct ProjectLock<'a> {
    registry: &'a LockRegistry,
    project_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ProjectLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let idle = locks
            .get(&self.project_id)
            .map_or(false, |lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&self.project_id);
        }
    }
}

/// Turn a project name into a repository name: lowercase ASCII letters,
/// digits, `.`, `_` and `-`, with runs of anything else collapsed to `-`.
pub fn repository_name(project_name: &str, fallback: &str) -> String {
    let mut name = String::with_capacity(project_name.len());
    for c in project_name.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
            name.push(c.to_ascii_lowercase());
        } else if !name.ends_with('-') {
            name.push('-');
        }
    }
    let name = name.trim_matches(|c| c == '-' || c == '.');
    if name.is_empty() {
        fallback.to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFilesystem;
    use crate::git::{FailPoint, InMemoryRemote};
    use crate::models::Resolution;
    use std::time::Duration;

    fn service(remote: &Arc<InMemoryRemote>) -> ProjectSyncService {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let config = SyncConfig {
            batch_pause_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.batch_pause(), Duration::ZERO);
        ProjectSyncService::new(remote.clone(), db, &config)
    }

    #[test]
    fn test_repository_name() {
        assert_eq!(repository_name("My Cool App!", "p1"), "my-cool-app");
        assert_eq!(repository_name("snake_case.v2", "p1"), "snake_case.v2");
        assert_eq!(repository_name("???", "p1"), "p1");
    }

    #[test]
    fn test_register_validation() {
        let remote = Arc::new(InMemoryRemote::new("alice"));
        let svc = service(&remote);
        svc.register_project("p1", "demo").unwrap();
        assert!(matches!(
            svc.register_project("p1", "demo"),
            Err(ServiceError::InvalidRequest(_))
        ));
        assert!(matches!(
            svc.register_project("", "demo"),
            Err(ServiceError::InvalidRequest(_))
        ));
        assert!(matches!(
            svc.register_project("../etc", "demo"),
            Err(ServiceError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_and_unlinked_projects() {
        let remote = Arc::new(InMemoryRemote::new("alice"));
        let svc = service(&remote);
        assert!(matches!(
            svc.check_if_pull_needed("nope").await,
            Err(ServiceError::ProjectNotFound(_))
        ));

        svc.register_project("p1", "demo").unwrap();
        assert!(matches!(
            svc.check_if_pull_needed("p1").await,
            Err(ServiceError::NotLinked(_))
        ));
        assert!(matches!(
            svc.remove_repo("p1").await,
            Err(ServiceError::NotLinked(_))
        ));
    }

    #[tokio::test]
    async fn test_create_repo_collision() {
        let remote = Arc::new(InMemoryRemote::new("alice"));
        remote.add_repository("demo");
        let svc = service(&remote);
        svc.register_project("p1", "Demo").unwrap();

        let fs = MemoryFilesystem::with_files(&[("a.txt", "A")]);
        let err = svc.create_repo("p1", &fs).await.unwrap_err();
        assert!(matches!(err, ServiceError::RepositoryAlreadyExists(name) if name == "alice/demo"));
        assert!(svc.get_project("p1").unwrap().repository_id.is_none());
    }

    #[tokio::test]
    async fn test_create_then_remove_repo() {
        let remote = Arc::new(InMemoryRemote::new("alice"));
        let svc = service(&remote);
        svc.register_project("p1", "demo").unwrap();

        let fs = MemoryFilesystem::with_files(&[("src/main.rs", "fn main() {}")]);
        let created = svc.create_repo("p1", &fs).await.unwrap();
        assert_eq!(created.repo_url, "https://github.test/alice/demo");

        let project = svc.get_project("p1").unwrap();
        let repo_id = project.repository_id.clone().unwrap();
        let repo = remote.resolve_by_id(&repo_id).await.unwrap().unwrap();
        assert_eq!(remote.head_sha(&repo), project.last_commit);
        assert_eq!(
            remote.files_at_head(&repo).get("src/main.rs").map(String::as_str),
            Some("fn main() {}")
        );
        assert!(!svc.check_if_pull_needed("p1").await.unwrap().needs_pull);

        assert!(matches!(
            svc.create_repo("p1", &fs).await,
            Err(ServiceError::RepositoryAlreadyExists(_))
        ));

        assert!(svc.remove_repo("p1").await.unwrap().success);
        assert!(!remote.repository_exists(&repo_id));
        assert!(svc.get_project("p1").unwrap().repository_id.is_none());

        let history = svc.history("p1", 10).unwrap();
        let actions: Vec<(&str, bool)> = history
            .iter()
            .map(|e| (e.action.as_str(), e.success))
            .collect();
        assert_eq!(
            actions,
            vec![
                ("remove_repo", true),
                ("create_repo", false),
                ("create_repo", true)
            ]
        );
    }

    #[tokio::test]
    async fn test_remove_repo_already_deleted_remotely() {
        let remote = Arc::new(InMemoryRemote::new("alice"));
        let svc = service(&remote);
        svc.register_project("p1", "demo").unwrap();
        svc.db().link_repository("p1", "999999", Some("abc")).unwrap();

        assert!(svc.remove_repo("p1").await.unwrap().success);
        assert!(svc.get_project("p1").unwrap().repository_id.is_none());
    }

    #[tokio::test]
    async fn test_commit_uses_default_message() {
        let remote = Arc::new(InMemoryRemote::new("alice"));
        let repo = remote.add_repository("demo");
        remote.seed_commit(&repo, &[("a.txt", "A")], "first");
        let svc = service(&remote);
        svc.register_project("p1", "demo").unwrap();
        svc.db().link_repository("p1", &repo.id, None).unwrap();

        let fs = MemoryFilesystem::with_files(&[("a.txt", "A2")]);
        let response = svc.commit("p1", &fs, Some("   ")).await.unwrap();
        let head = remote.get_head_commit(&repo).await.unwrap();
        assert_eq!(response.commit_sha, head.sha);
        assert_eq!(head.message, "Update from sandbox");
        assert_eq!(
            svc.get_project("p1").unwrap().last_commit.as_deref(),
            Some(head.sha.as_str())
        );
    }

    #[tokio::test]
    async fn test_resolve_records_given_commit() {
        let remote = Arc::new(InMemoryRemote::new("alice"));
        let repo = remote.add_repository("demo");
        let first = remote.seed_commit(&repo, &[("a.txt", "remote")], "first");
        let svc = service(&remote);
        svc.register_project("p1", "demo").unwrap();
        svc.db().link_repository("p1", &repo.id, None).unwrap();

        let fs = MemoryFilesystem::with_files(&[("a.txt", "local")]);
        let pulled = svc.pull("p1", &fs).await.unwrap();
        assert_eq!(pulled.commit_sha.as_deref(), Some(first.sha.as_str()));
        let resolution = ConflictResolution::for_conflict(&pulled.conflicts[0], Resolution::Incoming);

        assert!(matches!(
            svc.resolve_conflicts("p1", &fs, "  ", &[resolution.clone()]).await,
            Err(ServiceError::InvalidRequest(_))
        ));
        assert_eq!(fs.read_file("a.txt").await.unwrap().as_deref(), Some("local"));

        remote.seed_commit(&repo, &[("a.txt", "newer")], "second");
        let response = svc
            .resolve_conflicts("p1", &fs, &first.sha, &[resolution])
            .await
            .unwrap();
        assert_eq!(response.overwritten, vec!["a.txt"]);
        assert_eq!(
            svc.get_project("p1").unwrap().last_commit.as_deref(),
            Some(first.sha.as_str())
        );
        assert!(svc.check_if_pull_needed("p1").await.unwrap().needs_pull);
    }

    #[tokio::test]
    async fn test_failed_operations_are_audited() {
        let remote = Arc::new(InMemoryRemote::new("alice"));
        let svc = service(&remote);
        svc.register_project("p1", "demo").unwrap();

        remote.fail_at(FailPoint::CreateBlob(1));
        let fs = MemoryFilesystem::with_files(&[("a.txt", "A")]);
        assert!(svc.create_repo("p1", &fs).await.is_err());
        let project = svc.get_project("p1").unwrap();
        assert!(project.repository_id.is_some());
        assert!(project.last_commit.is_none());

        remote.fail_at(FailPoint::ResolveById);
        assert!(svc.remove_repo("p1").await.is_err());
        assert!(svc.get_project("p1").unwrap().repository_id.is_some());

        let history = svc.history("p1", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, "remove_repo");
        assert_eq!(history[1].action, "create_repo");
        assert!(history.iter().all(|e| !e.success));
        assert!(history.iter().all(|e| e.details.is_some()));
    }

    #[tokio::test]
    async fn test_lock_entries_are_released() {
        let remote = Arc::new(InMemoryRemote::new("alice"));
        let svc = service(&remote);
        svc.register_project("p1", "demo").unwrap();

        let held = svc.lock("p1").await;
        let _other = svc.lock("p2").await;
        assert_eq!(svc.locks.lock().unwrap().len(), 2);
        drop(held);
        assert!(!svc.locks.lock().unwrap().contains_key("p1"));

        let fs = MemoryFilesystem::new();
        assert!(svc.create_repo("p1", &fs).await.is_ok());
        assert!(svc.remove_repo("p1").await.is_ok());
        assert_eq!(svc.locks.lock().unwrap().len(), 1);
    }
}
