//! Application of caller-chosen conflict resolutions.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::errors::FilesystemError;
use crate::fs::ProjectFilesystem;
use crate::models::{ConflictResolution, Resolution};

/// Applies resolutions for conflicts withheld by a pull.
///
/// Holds nothing between calls: the caller re-submits each conflict payload
/// together with the side it picked.
pub struct ConflictStager;

impl ConflictStager {
    /// Apply `resolutions` to `fs`. Returns the paths that were overwritten.
    ///
    /// `Incoming` overwrites the sandbox file with the remote content, `Local`
    /// leaves it alone. When a path appears more than once the last entry
    /// wins. Ownership is fixed once after all writes; a failure there is
    /// logged and ignored.
    pub async fn apply_resolutions(
        resolutions: &[ConflictResolution],
        fs: &dyn ProjectFilesystem,
    ) -> Result<Vec<String>, FilesystemError> {
        let mut order: Vec<&str> = Vec::new();
        let mut latest: HashMap<&str, &ConflictResolution> = HashMap::new();
        for r in resolutions {
            if latest.insert(r.path.as_str(), r).is_none() {
                order.push(r.path.as_str());
            }
        }

        let mut written = Vec::new();
        for path in order {
            let Some(r) = latest.get(path) else {
                continue;
            };
            match r.resolution {
                Resolution::Incoming => {
                    fs.write_file(&r.path, &r.incoming_content).await?;
                    debug!(path = %r.path, "took incoming content");
                    written.push(r.path.clone());
                }
                Resolution::Local => debug!(path = %r.path, "kept local content"),
            }
        }

        if let Err(e) = fs.fix_permissions().await {
            warn!(error = %e, "permission fix after resolving conflicts failed");
        }

        info!(
            resolutions = resolutions.len(),
            overwritten = written.len(),
            "conflict resolutions applied"
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFilesystem;
    use crate::models::Conflict;

    fn resolve(path: &str, resolution: Resolution, incoming: &str) -> ConflictResolution {
        ConflictResolution::for_conflict(&Conflict::new(path, "mine", incoming), resolution)
    }

    #[tokio::test]
    async fn test_local_keeps_and_incoming_overwrites() {
        let fs = MemoryFilesystem::with_files(&[("a.txt", "mine"), ("b.txt", "mine")]);
        let written = ConflictStager::apply_resolutions(
            &[
                resolve("a.txt", Resolution::Local, "theirs-a"),
                resolve("b.txt", Resolution::Incoming, "theirs-b"),
            ],
            &fs,
        )
        .await
        .unwrap();

        assert_eq!(written, vec!["b.txt"]);
        assert_eq!(fs.get("a.txt").as_deref(), Some("mine"));
        assert_eq!(fs.get("b.txt").as_deref(), Some("theirs-b"));
        assert_eq!(fs.writes(), vec!["b.txt"]);
        assert_eq!(fs.permission_fixes(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_paths_last_wins() {
        let fs = MemoryFilesystem::with_files(&[("a.txt", "mine")]);
        ConflictStager::apply_resolutions(
            &[
                resolve("a.txt", Resolution::Incoming, "theirs"),
                resolve("a.txt", Resolution::Local, "theirs"),
            ],
            &fs,
        )
        .await
        .unwrap();

        assert_eq!(fs.get("a.txt").as_deref(), Some("mine"));
        assert!(fs.writes().is_empty());
    }

    #[tokio::test]
    async fn test_reapplying_is_idempotent() {
        let fs = MemoryFilesystem::with_files(&[("a.txt", "mine")]);
        let rs = [resolve("a.txt", Resolution::Incoming, "theirs")];
        ConflictStager::apply_resolutions(&rs, &fs).await.unwrap();
        ConflictStager::apply_resolutions(&rs, &fs).await.unwrap();
        assert_eq!(fs.snapshot().len(), 1);
        assert_eq!(fs.get("a.txt").as_deref(), Some("theirs"));
    }

    #[tokio::test]
    async fn test_permission_failure_is_not_fatal() {
        let fs = MemoryFilesystem::with_files(&[("a.txt", "mine")]).fail_permission_fix();
        let written = ConflictStager::apply_resolutions(
            &[resolve("a.txt", Resolution::Incoming, "theirs")],
            &fs,
        )
        .await
        .unwrap();
        assert_eq!(written, vec!["a.txt"]);
        assert_eq!(fs.permission_fixes(), 1);
    }
}
