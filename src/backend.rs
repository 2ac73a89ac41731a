//! Local project backend
//!
//! The proxy that owns local projects, identities and their git data. [`Backend`] is
//! what the reconciler and source reader consume; [`ProxyClient`] talks to the proxy's
//! HTTP API.

use crate::codec::ProjectUrn;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Proxy error variant for unknown entities
const NOT_FOUND_VARIANT: &str = "NOT_FOUND";
/// `NOT_FOUND` message of a proxy whose keystore is still sealed
const NO_SESSION_MESSAGE: &str = "no session has been created yet";
/// `NOT_FOUND` message for a path no proxy route matches
const UNKNOWN_ROUTE_MESSAGE: &str = "Resource not found";

/// Backend errors
#[derive(Debug, Error)]
pub enum BackendError {
    /// The proxy does not know the requested entity
    #[error("Not found: {0}")]
    NotFound(String),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Proxy returned an error
    #[error("Proxy error {status} ({variant}): {message}")]
    Server {
        status: u16,
        variant: String,
        message: String,
    },

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ==================== Types ====================

/// Project as known to the local proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub urn: ProjectUrn,
    #[serde(default)]
    pub shareable_entity_identifier: Option<String>,
    pub metadata: ProjectMetadata,
    #[serde(default)]
    pub stats: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub default_branch: String,
    #[serde(default)]
    pub maintainers: Vec<String>,
}

/// A local identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub urn: ProjectUrn,
    #[serde(default)]
    pub peer_id: Option<String>,
    pub metadata: IdentityMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityMetadata {
    pub handle: String,
    /// Ethereum address the identity claims for itself
    #[serde(default)]
    pub ethereum: Option<EthereumClaim>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EthereumClaim {
    pub address: String,
    #[serde(default)]
    pub expiration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Commit as listed in a branch history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary {
    pub sha1: String,
    pub author: Person,
    pub committer: Person,
    /// UNIX seconds
    pub committer_time: i64,
    pub summary: String,
    #[serde(default)]
    pub description: String,
}

/// Diff statistics of a commit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    #[serde(default)]
    pub summary: ChangesetSummary,
    #[serde(default)]
    pub files: Vec<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetSummary {
    pub additions: u64,
    pub deletions: u64,
}

/// Commit as returned by the proxy; branch and changeset may be missing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    #[serde(flatten)]
    pub header: CommitSummary,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub changeset: Option<Changeset>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObjectType {
    Blob,
    Tree,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastCommit {
    pub author: Person,
    pub summary: String,
    pub sha1: String,
    pub committer_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    pub name: String,
    pub object_type: ObjectType,
    #[serde(default)]
    pub last_commit: Option<LastCommit>,
}

/// Child of a tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub path: String,
    pub info: Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub path: String,
    pub info: Info,
    pub entries: Vec<SourceEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub path: String,
    pub info: Info,
    #[serde(default)]
    pub binary: bool,
    #[serde(default)]
    pub content: String,
}

/// Branches and tags one peer has for a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    #[serde(alias = "user")]
    pub identity: Identity,
    pub branches: Vec<String>,
    pub tags: Vec<String>,
}

// ==================== Trait ====================

/// Request/response access to local projects and their source
#[async_trait]
pub trait Backend: Send + Sync {
    async fn project(&self, urn: &ProjectUrn) -> Result<Project, BackendError>;

    async fn identity(&self, urn: &ProjectUrn) -> Result<Identity, BackendError>;

    async fn commit(&self, project: &ProjectUrn, sha1: &str) -> Result<CommitRecord, BackendError>;

    /// Commits of a branch, newest first
    async fn commits(&self, project: &ProjectUrn, branch: &str) -> Result<Vec<CommitSummary>, BackendError>;

    async fn revisions(&self, project: &ProjectUrn) -> Result<Vec<Revision>, BackendError>;

    async fn tree(&self, project: &ProjectUrn, revision: &str, prefix: &str) -> Result<Tree, BackendError>;

    async fn blob(&self, project: &ProjectUrn, revision: &str, path: &str) -> Result<Blob, BackendError>;

    /// Branches of a repository on the local filesystem
    async fn local_branches(&self, path: &str) -> Result<Vec<String>, BackendError>;
}

// ==================== HTTP client ====================

/// Proxy client configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Base URL of the proxy API
    pub base_url: String,
    /// Auth token, sent as the `auth-cookie` cookie
    pub auth_token: Option<String>,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:17246".to_string(),
            auth_token: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Deserialize)]
struct ProxyErrorBody {
    message: String,
    variant: String,
}

/// HTTP client for the proxy API
pub struct ProxyClient {
    config: ProxyConfig,
    client: Client,
}

impl ProxyClient {
    pub fn new(config: ProxyConfig) -> Result<Self, BackendError> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref token) = config.auth_token {
            let value = header::HeaderValue::from_str(&format!("auth-cookie={}", token))
                .map_err(|e| BackendError::Server {
                    status: 0,
                    variant: "INVALID_AUTH_TOKEN".into(),
                    message: e.to_string(),
                })?;
            headers.insert(header::COOKIE, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get<T: DeserializeOwned>(&self, url: String, query: &[(&str, &str)]) -> Result<T, BackendError> {
        debug!(url = %url, "Proxy request");
        let response = self.client.get(&url).query(query).send().await?;
        self.handle_response(&url, response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        url: &str,
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_error(status, &body, url))
    }
}

/// Map a failed proxy response to a [`BackendError`].
///
/// Only a `{message, variant}` body with the `NOT_FOUND` variant names a missing entity.
/// A locked proxy and an unmatched route carry the same variant and are kept as server
/// errors, as is any 404 without a proxy error body.
fn classify_error(status: StatusCode, body: &str, url: &str) -> BackendError {
    let Ok(parsed) = serde_json::from_str::<ProxyErrorBody>(body) else {
        return BackendError::Server {
            status: status.as_u16(),
            variant: "UNKNOWN".into(),
            message: if body.is_empty() { url.to_string() } else { body.to_string() },
        };
    };

    let missing_entity = parsed.variant == NOT_FOUND_VARIANT
        && parsed.message != NO_SESSION_MESSAGE
        && parsed.message != UNKNOWN_ROUTE_MESSAGE;
    if missing_entity {
        return BackendError::NotFound(parsed.message);
    }

    BackendError::Server {
        status: status.as_u16(),
        variant: parsed.variant,
        message: parsed.message,
    }
}

#[async_trait]
impl Backend for ProxyClient {
    async fn project(&self, urn: &ProjectUrn) -> Result<Project, BackendError> {
        let url = self.url(&format!("projects/{}", urlencoding::encode(&urn.to_string())));
        self.get(url, &[]).await
    }

    async fn identity(&self, urn: &ProjectUrn) -> Result<Identity, BackendError> {
        let url = self.url(&format!("identities/{}", urlencoding::encode(&urn.to_string())));
        self.get(url, &[]).await
    }

    async fn commit(&self, project: &ProjectUrn, sha1: &str) -> Result<CommitRecord, BackendError> {
        let url = self.url(&format!(
            "source/commit/{}/{}",
            urlencoding::encode(&project.to_string()),
            urlencoding::encode(sha1)
        ));
        self.get(url, &[]).await
    }

    async fn commits(&self, project: &ProjectUrn, branch: &str) -> Result<Vec<CommitSummary>, BackendError> {
        let url = self.url(&format!(
            "source/commits/{}/{}",
            urlencoding::encode(&project.to_string()),
            urlencoding::encode(branch)
        ));
        self.get(url, &[]).await
    }

    async fn revisions(&self, project: &ProjectUrn) -> Result<Vec<Revision>, BackendError> {
        let url = self.url(&format!(
            "source/revisions/{}",
            urlencoding::encode(&project.to_string())
        ));
        self.get(url, &[]).await
    }

    async fn tree(&self, project: &ProjectUrn, revision: &str, prefix: &str) -> Result<Tree, BackendError> {
        let url = self.url(&format!("source/tree/{}", urlencoding::encode(&project.to_string())));
        self.get(url, &[("revision", revision), ("prefix", prefix)]).await
    }

    async fn blob(&self, project: &ProjectUrn, revision: &str, path: &str) -> Result<Blob, BackendError> {
        let url = self.url(&format!("source/blob/{}", urlencoding::encode(&project.to_string())));
        self.get(url, &[("revision", revision), ("path", path)]).await
    }

    async fn local_branches(&self, path: &str) -> Result<Vec<String>, BackendError> {
        let url = self.url(&format!(
            "source/local-branches/{}",
            path.trim_start_matches('/')
        ));
        self.get(url, &[]).await
    }
}
