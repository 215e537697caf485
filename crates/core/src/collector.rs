//! Gathers project files for an outbound commit.

use tracing::{debug, info, warn};

use crate::config::EmptyFilePolicy;
use crate::errors::FilesystemError;
use crate::fs::ProjectFilesystem;
use crate::models::{FileEntry, FileTreeNode};

/// Walks a [`FileTreeNode`] depth-first and reads every file through the
/// project filesystem.
pub struct CommitCollector {
    empty_files: EmptyFilePolicy,
}

impl CommitCollector {
    pub fn new(empty_files: EmptyFilePolicy) -> Self {
        Self { empty_files }
    }

    /// Flatten the tree into `(path, content)` pairs in traversal order.
    ///
    /// Files that no longer exist are skipped, as are files that are not
    /// UTF-8 text. Empty files are skipped or kept according to the
    /// [`EmptyFilePolicy`].
    pub async fn collect(
        &self,
        root: &FileTreeNode,
        fs: &dyn ProjectFilesystem,
    ) -> Result<Vec<FileEntry>, FilesystemError> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            match node {
                FileTreeNode::Folder { children, .. } => {
                    // Reverse so children pop in their listed order.
                    stack.extend(children.iter().rev());
                }
                FileTreeNode::File { id } => match fs.read_file(id).await {
                    Err(FilesystemError::NotText(path)) => {
                        warn!(path = %path, "skipping non-text file");
                    }
                    Err(e) => return Err(e),
                    Ok(None) => debug!(path = %id, "skipping file that vanished"),
                    Ok(Some(content))
                        if content.is_empty() && self.empty_files == EmptyFilePolicy::Skip =>
                    {
                        debug!(path = %id, "skipping empty file");
                    }
                    Ok(Some(content)) => out.push(FileEntry::new(id.clone(), content)),
                },
            }
        }
        info!(count = out.len(), "collected files for commit");
        Ok(out)
    }

    /// List the project and collect every file.
    pub async fn collect_all(
        &self,
        fs: &dyn ProjectFilesystem,
    ) -> Result<Vec<FileEntry>, FilesystemError> {
        let paths = fs.list_paths().await?;
        let tree = FileTreeNode::from_paths(&paths);
        self.collect(&tree, fs).await
    }
}

impl Default for CommitCollector {
    fn default() -> Self {
        Self::new(EmptyFilePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFilesystem;

    fn paths(entries: &[FileEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.path.as_str()).collect()
    }

    #[tokio::test]
    async fn test_depth_first_order() {
        let fs = MemoryFilesystem::with_files(&[
            ("b.txt", "B"),
            ("src/lib.rs", "lib"),
            ("src/bin/cli.rs", "cli"),
            ("a.txt", "A"),
        ]);
        let entries = CommitCollector::default().collect_all(&fs).await.unwrap();
        assert_eq!(
            paths(&entries),
            vec!["a.txt", "b.txt", "src/bin/cli.rs", "src/lib.rs"]
        );
        assert_eq!(entries[2].content, "cli");
    }

    #[tokio::test]
    async fn test_skip_policy_drops_empty_files() {
        let fs = MemoryFilesystem::with_files(&[("src/.gitkeep", ""), ("main.rs", "fn main() {}")]);
        let entries = CommitCollector::new(EmptyFilePolicy::Skip)
            .collect_all(&fs)
            .await
            .unwrap();
        assert_eq!(paths(&entries), vec!["main.rs"]);
    }

    #[tokio::test]
    async fn test_keep_policy_commits_empty_files() {
        let fs = MemoryFilesystem::with_files(&[("src/.gitkeep", ""), ("main.rs", "fn main() {}")]);
        let entries = CommitCollector::new(EmptyFilePolicy::Keep)
            .collect_all(&fs)
            .await
            .unwrap();
        assert_eq!(paths(&entries), vec!["main.rs", "src/.gitkeep"]);
        assert_eq!(entries[1].content, "");
    }

    #[tokio::test]
    async fn test_vanished_files_are_skipped() {
        let fs = MemoryFilesystem::with_files(&[("a.txt", "A")]);
        let tree = FileTreeNode::from_paths(["a.txt", "gone.txt"]);
        let entries = CommitCollector::default().collect(&tree, &fs).await.unwrap();
        assert_eq!(paths(&entries), vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_non_text_files_are_skipped() {
        let fs = MemoryFilesystem::with_files(&[("a.txt", "A"), ("src/main.rs", "fn main() {}")])
            .with_binary_file("favicon.ico");
        let entries = CommitCollector::default().collect_all(&fs).await.unwrap();
        assert_eq!(paths(&entries), vec!["a.txt", "src/main.rs"]);
    }
}
