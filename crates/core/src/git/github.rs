//! GitHub REST API client implementing [`RemoteRepository`].
//!
//! All loosely-typed JSON stays inside this module: every response is
//! deserialised into a private wire struct and converted to the typed models.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use super::RemoteRepository;
use crate::errors::RemoteError;
use crate::models::{CommitRecord, NewTreeEntry, RepositoryRef, TreeEntry, DEFAULT_BRANCH};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    id: u64,
    name: String,
    owner: GitHubOwner,
    html_url: String,
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubOwner {
    login: String,
}

impl From<GitHubRepo> for RepositoryRef {
    fn from(repo: GitHubRepo) -> Self {
        Self {
            id: repo.id.to_string(),
            owner: repo.owner.login,
            name: repo.name,
            default_branch: repo
                .default_branch
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            html_url: repo.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitCommit {
    sha: String,
    message: String,
    author: GitActor,
    tree: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitActor {
    date: DateTime<Utc>,
}

impl From<GitCommit> for CommitRecord {
    fn from(commit: GitCommit) -> Self {
        Self {
            sha: commit.sha,
            message: commit.message,
            author_date: commit.author.date,
            tree_sha: commit.tree.sha,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitTree {
    tree: Vec<GitTreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct GitTreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitBlob {
    content: String,
    encoding: String,
}

#[derive(Debug, Serialize)]
struct NewTreeItem<'a> {
    path: &'a str,
    mode: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    sha: &'a str,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Asynchronous GitHub REST API client.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
    private_repos: bool,
    owner: OnceCell<String>,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self, RemoteError> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let token = token.into();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("sandsync/0.1"));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        info!(api_url = %api_url, "created GitHubClient");
        Ok(Self {
            http,
            api_url,
            token,
            private_repos: true,
            owner: OnceCell::new(),
        })
    }

    /// Use a fixed owner login instead of looking up the authenticated user.
    pub fn with_owner(self, owner: impl Into<String>) -> Self {
        Self {
            owner: OnceCell::new_with(Some(owner.into())),
            ..self
        }
    }

    pub fn with_private_repos(self, private_repos: bool) -> Self {
        Self {
            private_repos,
            ..self
        }
    }

    fn repo_url(&self, repo: &RepositoryRef, tail: &str) -> String {
        format!("{}/repos/{}/{}", self.api_url, repo.full_name(), tail)
    }

    /// GET a JSON resource, mapping 404 to `Ok(None)`.
    async fn get_optional<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
    ) -> Result<Option<T>, RemoteError> {
        let resp = self.http.get(url).bearer_auth(&self.token).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check_response(resp).await?;
        Ok(Some(resp.json().await?))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, RemoteError> {
        self.get_optional(url)
            .await?
            .ok_or_else(|| RemoteError::NotFound(url.to_string()))
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, RemoteError> {
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        let resp = check_response(resp).await?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl RemoteRepository for GitHubClient {
    #[instrument(skip(self))]
    async fn resolve_by_id(&self, repo_id: &str) -> Result<Option<RepositoryRef>, RemoteError> {
        let url = format!("{}/repositories/{}", self.api_url, repo_id);
        let repo: Option<GitHubRepo> = self.get_optional(&url).await?;
        debug!(found = repo.is_some(), "resolved repository by id");
        Ok(repo.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn resolve_by_name(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<RepositoryRef>, RemoteError> {
        let url = format!("{}/repos/{}/{}", self.api_url, owner, name);
        let repo: Option<GitHubRepo> = self.get_optional(&url).await?;
        debug!(found = repo.is_some(), "resolved repository by name");
        Ok(repo.map(Into::into))
    }

    #[instrument(skip(self, repo), fields(repo = %repo.full_name()))]
    async fn get_head_commit(&self, repo: &RepositoryRef) -> Result<CommitRecord, RemoteError> {
        let url = self.repo_url(repo, &format!("git/ref/heads/{}", repo.default_branch));
        let resp = self.http.get(&url).bearer_auth(&self.token).send().await?;
        // 404: branch missing; 409: repository is empty.
        let status = resp.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::CONFLICT {
            return Err(RemoteError::BranchNotFound {
                repo: repo.full_name(),
                branch: repo.default_branch.clone(),
            });
        }
        let head: GitRef = check_response(resp).await?.json().await?;

        let url = self.repo_url(repo, &format!("git/commits/{}", head.object.sha));
        let commit: GitCommit = self.get_json(&url).await?;
        debug!(sha = %commit.sha, "fetched head commit");
        Ok(commit.into())
    }

    #[instrument(skip(self, repo), fields(repo = %repo.full_name()))]
    async fn get_tree_recursive(
        &self,
        repo: &RepositoryRef,
        tree_sha: &str,
    ) -> Result<Vec<TreeEntry>, RemoteError> {
        let url = self.repo_url(repo, &format!("git/trees/{}?recursive=1", tree_sha));
        let tree: GitTree = self.get_json(&url).await?;
        let entries = tree_entries(tree_sha, tree)?;
        debug!(count = entries.len(), "fetched tree");
        Ok(entries)
    }

    #[instrument(skip(self, repo), fields(repo = %repo.full_name()))]
    async fn read_blob(
        &self,
        repo: &RepositoryRef,
        blob_sha: &str,
    ) -> Result<Vec<u8>, RemoteError> {
        let url = self.repo_url(repo, &format!("git/blobs/{}", blob_sha));
        let blob: GitBlob = self.get_json(&url).await?;
        decode_blob(blob_sha, &blob)
    }

    #[instrument(skip(self, repo, content), fields(repo = %repo.full_name(), len = content.len()))]
    async fn create_blob(
        &self,
        repo: &RepositoryRef,
        content: &str,
    ) -> Result<String, RemoteError> {
        let url = self.repo_url(repo, "git/blobs");
        let body = serde_json::json!({ "content": content, "encoding": "utf-8" });
        let blob: GitObject = self.post_json(&url, &body).await?;
        debug!(sha = %blob.sha, "created blob");
        Ok(blob.sha)
    }

    #[instrument(skip(self, repo, entries), fields(repo = %repo.full_name(), count = entries.len()))]
    async fn create_tree(
        &self,
        repo: &RepositoryRef,
        base_tree_sha: &str,
        entries: &[NewTreeEntry],
    ) -> Result<String, RemoteError> {
        let url = self.repo_url(repo, "git/trees");
        let items: Vec<NewTreeItem<'_>> = entries
            .iter()
            .map(|e| NewTreeItem {
                path: &e.path,
                mode: "100644",
                kind: "blob",
                sha: &e.blob_sha,
            })
            .collect();
        let body = serde_json::json!({ "base_tree": base_tree_sha, "tree": items });
        let tree: GitObject = self.post_json(&url, &body).await?;
        debug!(sha = %tree.sha, "created tree");
        Ok(tree.sha)
    }

    #[instrument(skip(self, repo, message), fields(repo = %repo.full_name()))]
    async fn create_commit(
        &self,
        repo: &RepositoryRef,
        tree_sha: &str,
        parent_sha: &str,
        message: &str,
    ) -> Result<CommitRecord, RemoteError> {
        let url = self.repo_url(repo, "git/commits");
        let body = serde_json::json!({
            "message": message,
            "tree": tree_sha,
            "parents": [parent_sha],
        });
        let commit: GitCommit = self.post_json(&url, &body).await?;
        info!(sha = %commit.sha, "created commit");
        Ok(commit.into())
    }

    #[instrument(skip(self, repo), fields(repo = %repo.full_name()))]
    async fn update_ref(&self, repo: &RepositoryRef, commit_sha: &str) -> Result<(), RemoteError> {
        let url = self.repo_url(repo, &format!("git/refs/heads/{}", repo.default_branch));
        let body = serde_json::json!({ "sha": commit_sha, "force": false });
        let resp = self
            .http
            .patch(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        check_response(resp).await?;
        info!(branch = %repo.default_branch, "updated ref");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_repository(&self, name: &str) -> Result<RepositoryRef, RemoteError> {
        let url = format!("{}/user/repos", self.api_url);
        let body = serde_json::json!({
            "name": name,
            "private": self.private_repos,
            "auto_init": true,
        });
        let repo: GitHubRepo = self.post_json(&url, &body).await?;
        info!(repo_name = name, id = repo.id, "created repository");
        Ok(repo.into())
    }

    #[instrument(skip(self, repo), fields(repo = %repo.full_name()))]
    async fn delete_repository(&self, repo: &RepositoryRef) -> Result<(), RemoteError> {
        let url = format!("{}/repos/{}", self.api_url, repo.full_name());
        let resp = self
            .http
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        check_response(resp).await?;
        info!("deleted repository");
        Ok(())
    }

    async fn owner(&self) -> Result<String, RemoteError> {
        let login = self
            .owner
            .get_or_try_init(|| async {
                let url = format!("{}/user", self.api_url);
                let user: GitHubUser = self.get_json(&url).await?;
                debug!(login = %user.login, "fetched authenticated user");
                Ok::<_, RemoteError>(user.login)
            })
            .await?;
        Ok(login.clone())
    }
}

/// Decode a blob payload. GitHub wraps base64 content at 60 columns.
fn decode_blob(sha: &str, blob: &GitBlob) -> Result<Vec<u8>, RemoteError> {
    match blob.encoding.as_str() {
        "base64" => {
            let compact: String = blob
                .content
                .chars()
                .filter(|c| !c.is_ascii_whitespace())
                .collect();
            base64::engine::general_purpose::STANDARD
                .decode(compact)
                .map_err(|e| RemoteError::Decode {
                    sha: sha.to_string(),
                    detail: e.to_string(),
                })
        }
        "utf-8" => Ok(blob.content.clone().into_bytes()),
        other => Err(RemoteError::Decode {
            sha: sha.to_string(),
            detail: format!("unsupported encoding '{}'", other),
        }),
    }
}

/// Map a non-success response to a [`RemoteError`], reading the body for
/// diagnostics.
async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let rate_limit_reset = resp
        .headers()
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let remaining_zero = resp
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        == Some("0");

    if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && remaining_zero)
    {
        return Err(RemoteError::RateLimited {
            reset_at: rate_limit_reset.unwrap_or_else(|| "unknown".to_string()),
        });
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RemoteError::AuthenticationFailed(format!("HTTP {}", status)));
    }
    if status == StatusCode::BAD_GATEWAY
        || status == StatusCode::SERVICE_UNAVAILABLE
        || status == StatusCode::GATEWAY_TIMEOUT
    {
        return Err(RemoteError::Unavailable(format!("HTTP {}", status)));
    }
    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| format!("HTTP {}", status));
    Err(RemoteError::ApiError {
        status: status.as_u16(),
        body,
    })
}

/// Flatten a recursive tree listing. A truncated listing is an error: a
/// partial tree would make missing files look deleted upstream.
fn tree_entries(tree_sha: &str, tree: GitTree) -> Result<Vec<TreeEntry>, RemoteError> {
    if tree.truncated {
        return Err(RemoteError::TreeTruncated {
            tree_sha: tree_sha.to_string(),
        });
    }
    Ok(tree
        .tree
        .into_iter()
        .filter(|item| item.kind != "commit")
        .map(|item| TreeEntry {
            is_file: item.kind == "blob",
            path: item.path,
            blob_sha: item.sha,
        })
        .collect())
}
