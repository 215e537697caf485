//! [`ProjectFilesystem`] over a directory on the local disk (the sandbox
//! mount point of one project).

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{normalize_path, ProjectFilesystem};
use crate::errors::FilesystemError;

/// Directory names never reported by [`LocalFilesystem::list_paths`].
const IGNORED_DIRS: &[&str] = &[".git"];

#[derive(Debug, Clone)]
pub struct LocalFilesystem {
    root: PathBuf,
    ownership: Option<(u32, u32)>,
}

impl LocalFilesystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ownership: None,
        }
    }

    /// Chown every file to `uid:gid` in [`fix_permissions`](ProjectFilesystem::fix_permissions).
    pub fn with_ownership(self, ownership: Option<(u32, u32)>) -> Self {
        Self { ownership, ..self }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<(String, PathBuf), FilesystemError> {
        let rel = normalize_path(path)?;
        let full = self.root.join(&rel);
        Ok((rel, full))
    }

    /// Remove now-empty directories between `dir` and the project root.
    async fn prune_empty_dirs(&self, mut dir: Option<&Path>) {
        while let Some(d) = dir {
            if d == self.root || !d.starts_with(&self.root) {
                break;
            }
            // remove_dir fails on non-empty directories, which ends the walk.
            if tokio::fs::remove_dir(d).await.is_err() {
                break;
            }
            debug!(dir = %d.display(), "removed empty directory");
            dir = d.parent();
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> FilesystemError {
    FilesystemError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl ProjectFilesystem for LocalFilesystem {
    async fn list_paths(&self) -> Result<Vec<String>, FilesystemError> {
        let root = self.root.clone();
        let listed = tokio::task::spawn_blocking(move || -> Result<Vec<String>, FilesystemError> {
            let mut paths = Vec::new();
            if !root.exists() {
                return Ok(paths);
            }
            let walker = WalkDir::new(&root).into_iter().filter_entry(|e| {
                e.depth() == 0
                    || !(e.file_type().is_dir()
                        && IGNORED_DIRS.iter().any(|d| e.file_name() == *d))
            });
            for entry in walker {
                let entry = entry.map_err(|e| {
                    let path = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    FilesystemError::Io {
                        path,
                        source: e.into(),
                    }
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let rel: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                paths.push(rel.join("/"));
            }
            paths.sort();
            Ok(paths)
        })
        .await
        .map_err(|e| io_error(&self.root, std::io::Error::new(ErrorKind::Other, e)))?;
        listed
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>, FilesystemError> {
        let (rel, full) = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| FilesystemError::NotText(rel)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&full, e)),
        }
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), FilesystemError> {
        let (_, full) = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| io_error(&full, e))?;
        debug!(path = %full.display(), bytes = content.len(), "wrote file");
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<(), FilesystemError> {
        let (_, full) = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => {
                debug!(path = %full.display(), "deleted file");
                self.prune_empty_dirs(full.parent()).await;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&full, e)),
        }
    }

    async fn fix_permissions(&self) -> Result<(), FilesystemError> {
        let Some((uid, gid)) = self.ownership else {
            return Ok(());
        };
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || chown_tree(&root, uid, gid))
            .await
            .map_err(|e| FilesystemError::PermissionFixFailed {
                path: self.root.display().to_string(),
                detail: e.to_string(),
            })?
    }
}

#[cfg(unix)]
fn chown_tree(root: &Path, uid: u32, gid: u32) -> Result<(), FilesystemError> {
    let mut failures = 0usize;
    let mut last_error = String::new();
    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if let Err(e) = std::os::unix::fs::chown(entry.path(), Some(uid), Some(gid)) {
            failures += 1;
            last_error = format!("{}: {}", entry.path().display(), e);
        }
    }
    if failures > 0 {
        warn!(failures, uid, gid, "some entries could not be chowned");
        return Err(FilesystemError::PermissionFixFailed {
            path: root.display().to_string(),
            detail: format!("{} entries failed, last: {}", failures, last_error),
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn chown_tree(_root: &Path, _uid: u32, _gid: u32) -> Result<(), FilesystemError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new(dir.path());

        fs.write_file("src/nested/a.txt", "hello").await.unwrap();
        assert_eq!(
            fs.read_file("/project/src/nested/a.txt").await.unwrap().as_deref(),
            Some("hello")
        );

        fs.delete_file("src/nested/a.txt").await.unwrap();
        assert_eq!(fs.read_file("src/nested/a.txt").await.unwrap(), None);
        assert!(!dir.path().join("src").exists());
        assert!(dir.path().exists());

        // Deleting twice is fine.
        fs.delete_file("src/nested/a.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_paths_skips_git_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join(".gitignore"), "target").unwrap();

        let fs = LocalFilesystem::new(dir.path());
        assert_eq!(
            fs.list_paths().await.unwrap(),
            vec![".gitignore".to_string(), "src/main.rs".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_root_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new(dir.path().join("not-created"));
        assert!(fs.list_paths().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_binary_file_is_not_text() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("logo.png"), [0x89, 0x50, 0xff, 0xfe]).unwrap();
        let fs = LocalFilesystem::new(dir.path());
        assert!(matches!(
            fs.read_file("logo.png").await,
            Err(FilesystemError::NotText(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        assert!(matches!(
            fs.write_file("../outside.txt", "x").await,
            Err(FilesystemError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_fix_permissions_without_owner_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        fs.fix_permissions().await.unwrap();
    }
}
