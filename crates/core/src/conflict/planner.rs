//! Classification of a pull against the sandbox.
//!
//! Given a remote snapshot and the files currently in the sandbox, the
//! planner deletes files removed upstream, writes files added upstream and
//! reports every file whose content differs on both sides as a conflict.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::errors::FilesystemError;
use crate::fs::{is_directory_marker, ProjectFilesystem};
use crate::models::{Conflict, FileEntry, PullResult, RemoteSnapshot};

/// Stateless pull planner.
pub struct SyncPlanner;

impl SyncPlanner {
    /// Classify `snapshot` against `local_paths` and apply deletions and new
    /// files to `fs` as a side effect.
    ///
    /// Every local file is read before anything is written or deleted, so a
    /// read failure leaves the sandbox untouched. Files whose content differs
    /// are returned as conflicts and left exactly as found. Equal content
    /// (exact string comparison) is not rewritten. A local file that is not
    /// UTF-8 text is never overwritten and is reported in `skipped_files`.
    pub async fn plan(
        snapshot: &RemoteSnapshot,
        local_paths: &[String],
        fs: &dyn ProjectFilesystem,
    ) -> Result<PullResult, FilesystemError> {
        let remote_paths: HashSet<&str> = snapshot
            .files
            .iter()
            .map(|f| f.path.as_str())
            .chain(snapshot.binary_paths.iter().map(String::as_str))
            .collect();

        let mut result = PullResult {
            success: true,
            commit_sha: Some(snapshot.commit.sha.clone()),
            ..Default::default()
        };

        let deletions: Vec<&String> = local_paths
            .iter()
            .filter(|p| !is_directory_marker(p) && !remote_paths.contains(p.as_str()))
            .collect();

        let mut additions: Vec<&FileEntry> = Vec::new();
        for file in &snapshot.files {
            match fs.read_file(&file.path).await {
                Ok(None) => additions.push(file),
                Ok(Some(local)) if local == file.content => {}
                Ok(Some(local)) => {
                    debug!(path = %file.path, "content differs, withholding");
                    result
                        .conflicts
                        .push(Conflict::new(&file.path, local, &file.content));
                }
                Err(FilesystemError::NotText(path)) => {
                    warn!(path = %path, "local file is not text, leaving it in place");
                    result.skipped_files.push(path);
                }
                Err(e) => return Err(e),
            }
        }

        // The remote is the source of truth for existence.
        for path in deletions {
            fs.delete_file(path).await?;
            debug!(path = %path, "deleted file removed upstream");
            result.deleted_files.push(path.clone());
        }

        for file in additions {
            fs.write_file(&file.path, &file.content).await?;
            debug!(path = %file.path, "wrote new file");
            result.new_files.push(file.path.clone());
        }

        info!(
            new = result.new_files.len(),
            deleted = result.deleted_files.len(),
            conflicts = result.conflicts.len(),
            skipped = result.skipped_files.len(),
            "pull planned"
        );
        Ok(result)
    }
}
