//! Domain model types used throughout sandsync.
//!
//! These types bridge the remote repository capability, the sync engine, the
//! project store and the web API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Branch every sandbox repository syncs against.
pub const DEFAULT_BRANCH: &str = "main";

// ---------------------------------------------------------------------------
// Remote objects
// ---------------------------------------------------------------------------

/// A repository on the remote Git host.
///
/// Id lookups are authoritative; a name only identifies a repository for
/// collision checks before creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryRef {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    pub html_url: String,
}

impl RepositoryRef {
    /// `owner/name`, as used in REST paths and log lines.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// An immutable commit object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitRecord {
    pub sha: String,
    pub message: String,
    pub author_date: DateTime<Utc>,
    pub tree_sha: String,
}

impl CommitRecord {
    pub fn summary(&self) -> CommitSummary {
        CommitSummary {
            sha: self.sha.clone(),
            message: self.message.clone(),
            date: self.author_date,
        }
    }
}

/// The commit fields reported to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitSummary {
    pub sha: String,
    pub message: String,
    pub date: DateTime<Utc>,
}

/// One entry of a recursive tree listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub blob_sha: String,
    pub is_file: bool,
}

/// A path / blob pair used when building a new tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTreeEntry {
    pub path: String,
    pub blob_sha: String,
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// A project file: posix-relative path (no leading slash, no `project/`
/// prefix) and its text content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub content: String,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// The remote side of one pull: the commit it was read from, every text file
/// in its tree, and the paths whose blobs were not UTF-8 text.
#[derive(Debug, Clone)]
pub struct RemoteSnapshot {
    pub commit: CommitRecord,
    pub files: Vec<FileEntry>,
    pub binary_paths: Vec<String>,
}

/// In-memory project tree. File ids are their project-relative paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileTreeNode {
    File { id: String },
    Folder { id: String, children: Vec<FileTreeNode> },
}

impl FileTreeNode {
    /// Build a tree rooted at an unnamed folder from a flat list of file
    /// paths. Children are sorted by name, folders and files interleaved.
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut root = FileTreeNode::Folder {
            id: String::new(),
            children: Vec::new(),
        };
        for path in paths {
            let path = path.as_ref().trim_matches('/');
            if path.is_empty() {
                continue;
            }
            root.insert(path, 0);
        }
        root.sort();
        root
    }

    pub fn id(&self) -> &str {
        match self {
            Self::File { id } | Self::Folder { id, .. } => id,
        }
    }

    fn insert(&mut self, path: &str, depth: usize) {
        let Self::Folder { children, .. } = self else {
            return;
        };
        let segments: Vec<&str> = path.split('/').collect();
        let id = segments[..=depth].join("/");
        if depth + 1 == segments.len() {
            if !children.iter().any(|c| c.id() == id) {
                children.push(FileTreeNode::File { id });
            }
            return;
        }
        let idx = match children
            .iter()
            .position(|c| matches!(c, Self::Folder { id: cid, .. } if *cid == id))
        {
            Some(idx) => idx,
            None => {
                children.push(FileTreeNode::Folder {
                    id,
                    children: Vec::new(),
                });
                children.len() - 1
            }
        };
        children[idx].insert(path, depth + 1);
    }

    fn sort(&mut self) {
        if let Self::Folder { children, .. } = self {
            children.sort_by(|a, b| a.id().cmp(b.id()));
            for child in children {
                child.sort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pull / conflict model
// ---------------------------------------------------------------------------

/// A file present on both sides with differing content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conflict {
    pub path: String,
    pub local_content: String,
    pub incoming_content: String,
    #[serde(default)]
    pub resolved: bool,
}

impl Conflict {
    pub fn new(
        path: impl Into<String>,
        local_content: impl Into<String>,
        incoming_content: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            local_content: local_content.into(),
            incoming_content: incoming_content.into(),
            resolved: false,
        }
    }
}

/// Classification of one pull.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PullResult {
    pub success: bool,
    pub conflicts: Vec<Conflict>,
    pub new_files: Vec<String>,
    pub deleted_files: Vec<String>,
    /// Reserved for non-conflicting content changes; always empty while all
    /// content differences are routed to conflicts.
    pub updated_files: Vec<String>,
    /// Local files at remote text paths that were left alone because they
    /// are not UTF-8 text.
    #[serde(default)]
    pub skipped_files: Vec<String>,
    /// The remote commit this pull was classified against. Resolving the
    /// conflicts records exactly this commit as synced.
    #[serde(default)]
    pub commit_sha: Option<String>,
}

impl PullResult {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn is_noop(&self) -> bool {
        self.conflicts.is_empty() && self.new_files.is_empty() && self.deleted_files.is_empty()
    }
}

/// Which side wins a conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Keep the sandbox copy untouched.
    Local,
    /// Overwrite the sandbox copy with the remote content.
    Incoming,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Incoming => write!(f, "incoming"),
        }
    }
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "incoming" => Ok(Self::Incoming),
            other => Err(format!(
                "invalid resolution '{}': must be local or incoming",
                other
            )),
        }
    }
}

/// A caller-supplied resolution for one conflict. The caller re-submits the
/// conflict payload it received from the pull.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictResolution {
    pub path: String,
    pub resolution: Resolution,
    #[serde(default)]
    pub local_content: String,
    pub incoming_content: String,
}

impl ConflictResolution {
    pub fn for_conflict(conflict: &Conflict, resolution: Resolution) -> Self {
        Self {
            path: conflict.path.clone(),
            resolution,
            local_content: conflict.local_content.clone(),
            incoming_content: conflict.incoming_content.clone(),
        }
    }
}

/// Caller-persisted sync watermark.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncState {
    pub last_synced_commit_sha: Option<String>,
}

/// Answer to "does the sandbox need a pull?".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PullCheck {
    pub needs_pull: bool,
    pub latest_commit: Option<CommitSummary>,
}

// ---------------------------------------------------------------------------
// Project record
// ---------------------------------------------------------------------------

/// A sandbox project and its link to a remote repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    pub repository_id: Option<String>,
    pub last_commit: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectRecord {
    pub fn sync_state(&self) -> SyncState {
        SyncState {
            last_synced_commit_sha: self.last_commit.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_from_paths() {
        let tree = FileTreeNode::from_paths(["src/main.rs", "README.md", "src/lib/mod.rs"]);
        let FileTreeNode::Folder { children, .. } = tree else {
            panic!("root must be a folder");
        };
        assert_eq!(children.len(), 2);
        assert_eq!(children[0], FileTreeNode::File { id: "README.md".into() });
        let FileTreeNode::Folder { id, children } = &children[1] else {
            panic!("src must be a folder");
        };
        assert_eq!(id, "src");
        assert_eq!(children[0].id(), "src/lib");
        assert_eq!(children[1], FileTreeNode::File { id: "src/main.rs".into() });
    }

    #[test]
    fn test_tree_ignores_duplicates_and_slashes() {
        let tree = FileTreeNode::from_paths(["/a.txt", "a.txt", ""]);
        let FileTreeNode::Folder { children, .. } = tree else {
            panic!("root must be a folder");
        };
        assert_eq!(children, vec![FileTreeNode::File { id: "a.txt".into() }]);
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!("local".parse::<Resolution>().unwrap(), Resolution::Local);
        assert_eq!("incoming".parse::<Resolution>().unwrap(), Resolution::Incoming);
        assert!("theirs".parse::<Resolution>().is_err());
        assert_eq!(Resolution::Incoming.to_string(), "incoming");
    }

    #[test]
    fn test_resolution_json() {
        let json = r#"{"path":"a.txt","resolution":"incoming","incoming_content":"A2"}"#;
        let r: ConflictResolution = serde_json::from_str(json).unwrap();
        assert_eq!(r.resolution, Resolution::Incoming);
        assert_eq!(r.local_content, "");
    }

    #[test]
    fn test_pull_result_noop() {
        assert!(PullResult::default().is_noop());
        let result = PullResult {
            new_files: vec!["b.txt".into()],
            ..Default::default()
        };
        assert!(!result.is_noop());
        assert!(!result.has_conflicts());
    }
}
