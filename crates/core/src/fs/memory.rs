//! In-memory [`ProjectFilesystem`] with operation counters.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{normalize_path, ProjectFilesystem};
use crate::errors::FilesystemError;

#[derive(Debug, Default)]
struct Inner {
    files: BTreeMap<String, String>,
    /// Paths holding bytes that are not UTF-8 text.
    binary: BTreeSet<String>,
    writes: Vec<String>,
    deletes: Vec<String>,
    permission_fixes: usize,
    fail_permission_fix: bool,
}

/// A project held entirely in memory. Records every write and delete so
/// callers can assert which files an operation touched.
#[derive(Debug, Default)]
pub struct MemoryFilesystem {
    inner: Mutex<Inner>,
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files<P: AsRef<str>, C: AsRef<str>>(files: &[(P, C)]) -> Self {
        let fs = Self::new();
        {
            let mut inner = fs.inner();
            for (path, content) in files {
                inner
                    .files
                    .insert(path.as_ref().to_string(), content.as_ref().to_string());
            }
        }
        fs
    }

    /// Add a file whose bytes are not UTF-8; reading it fails with
    /// [`FilesystemError::NotText`].
    pub fn with_binary_file(self, path: &str) -> Self {
        {
            let mut inner = self.inner();
            inner.files.remove(path);
            inner.binary.insert(path.to_string());
        }
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        let inner = self.inner();
        inner.files.contains_key(path) || inner.binary.contains(path)
    }

    /// Make every `fix_permissions` call fail.
    pub fn fail_permission_fix(self) -> Self {
        self.inner().fail_permission_fix = true;
        self
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner().files.clone()
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.inner().files.get(path).cloned()
    }

    /// Paths written so far, in call order.
    pub fn writes(&self) -> Vec<String> {
        self.inner().writes.clone()
    }

    /// Paths deleted so far, in call order.
    pub fn deletes(&self) -> Vec<String> {
        self.inner().deletes.clone()
    }

    pub fn permission_fixes(&self) -> usize {
        self.inner().permission_fixes
    }

    pub fn reset_counters(&self) {
        let mut inner = self.inner();
        inner.writes.clear();
        inner.deletes.clear();
        inner.permission_fixes = 0;
    }
}

#[async_trait]
impl ProjectFilesystem for MemoryFilesystem {
    async fn list_paths(&self) -> Result<Vec<String>, FilesystemError> {
        let inner = self.inner();
        let paths: BTreeSet<String> = inner
            .files
            .keys()
            .chain(inner.binary.iter())
            .cloned()
            .collect();
        Ok(paths.into_iter().collect())
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>, FilesystemError> {
        let path = normalize_path(path)?;
        let inner = self.inner();
        if inner.binary.contains(&path) {
            return Err(FilesystemError::NotText(path));
        }
        Ok(inner.files.get(&path).cloned())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), FilesystemError> {
        let path = normalize_path(path)?;
        let mut inner = self.inner();
        inner.binary.remove(&path);
        inner.files.insert(path.clone(), content.to_string());
        inner.writes.push(path);
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<(), FilesystemError> {
        let path = normalize_path(path)?;
        let mut inner = self.inner();
        let removed_text = inner.files.remove(&path).is_some();
        if inner.binary.remove(&path) || removed_text {
            inner.deletes.push(path);
        }
        Ok(())
    }

    async fn fix_permissions(&self) -> Result<(), FilesystemError> {
        let mut inner = self.inner();
        inner.permission_fixes += 1;
        if inner.fail_permission_fix {
            return Err(FilesystemError::PermissionFixFailed {
                path: "/".into(),
                detail: "chown refused".into(),
            });
        }
        Ok(())
    }
}
