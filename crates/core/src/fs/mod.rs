//! Sandbox project filesystem capability.
//!
//! The sync engine never touches a global project root: every operation
//! receives a [`ProjectFilesystem`] for the project it works on.

pub mod local;
pub mod memory;

use async_trait::async_trait;

use crate::errors::FilesystemError;

pub use local::LocalFilesystem;
pub use memory::MemoryFilesystem;

/// File operations on one sandbox project. Paths are project-relative posix
/// paths as produced by [`normalize_path`].
#[async_trait]
pub trait ProjectFilesystem: Send + Sync {
    /// Every file path in the project.
    async fn list_paths(&self) -> Result<Vec<String>, FilesystemError>;

    /// Read a file. A missing file is `Ok(None)`, not an error.
    async fn read_file(&self, path: &str) -> Result<Option<String>, FilesystemError>;

    /// Create or overwrite a file, creating parent directories as needed.
    async fn write_file(&self, path: &str, content: &str) -> Result<(), FilesystemError>;

    /// Remove a file. Removing a missing file succeeds.
    async fn delete_file(&self, path: &str) -> Result<(), FilesystemError>;

    /// Restore sandbox ownership on the project tree.
    async fn fix_permissions(&self) -> Result<(), FilesystemError>;
}

/// Normalise a path to project-relative posix form: no leading slash, no
/// `project/` prefix, no `.` segments. Rejects `..` and empty paths.
pub fn normalize_path(path: &str) -> Result<String, FilesystemError> {
    let trimmed = path.trim_start_matches('/');
    let trimmed = trimmed.strip_prefix("project/").unwrap_or(trimmed);
    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(FilesystemError::InvalidPath(path.to_string())),
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err(FilesystemError::InvalidPath(path.to_string()));
    }
    Ok(segments.join("/"))
}

/// Whether a listed path denotes a directory rather than a file.
pub fn is_directory_marker(path: &str) -> bool {
    path.ends_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_prefixes() {
        assert_eq!(normalize_path("/project/src/main.rs").unwrap(), "src/main.rs");
        assert_eq!(normalize_path("project/a.txt").unwrap(), "a.txt");
        assert_eq!(normalize_path("./src//lib.rs").unwrap(), "src/lib.rs");
        assert_eq!(normalize_path("projects/a.txt").unwrap(), "projects/a.txt");
    }

    #[test]
    fn test_normalize_rejects_escape() {
        assert!(matches!(
            normalize_path("../etc/passwd"),
            Err(FilesystemError::InvalidPath(_))
        ));
        assert!(normalize_path("/").is_err());
    }

    #[test]
    fn test_directory_marker() {
        assert!(is_directory_marker("src/"));
        assert!(!is_directory_marker("src/main.rs"));
    }
}
