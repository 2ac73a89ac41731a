//! Subgraph query client
//!
//! Read-only GraphQL queries against two indexers: the orgs subgraph (orgs and their
//! anchors) and the multisig wallet subgraph (owners and thresholds). Nothing is cached
//! here; every call reflects what the indexer currently serves.

use crate::codec::{bytes_from_hex, decode_project_urn, Address, CommitHash, DecodeError, ProjectUrn};
use crate::config::{Config, Environment};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const GET_ORGS: &str = r#"
query GetOrgs($owners: [String!]!) {
  orgs(where: { owner_in: $owners }) {
    id
    owner
    creator
    timestamp
  }
}"#;

const GET_ORG_ANCHORS: &str = r#"
query GetOrgAnchoredProjects($orgAddress: String!) {
  projects(where: { org: $orgAddress }) {
    anchor {
      id
      objectId
      multihash
      timestamp
    }
  }
}"#;

const GET_SAFE_WALLETS: &str = r#"
query GetGnosisSafeWallets($owners: [String!]!) {
  wallets(where: { owners_contains: $owners }) {
    id
    owners
  }
}"#;

const GET_SAFE_MEMBERS: &str = r#"
query GetGnosisSafeMembers($id: String!) {
  wallets(where: { id: $id }) {
    owners
    threshold
  }
}"#;

// ==================== Transport ====================

/// GraphQL request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphqlRequest {
    pub query: String,
    pub variables: Value,
}

/// GraphQL error entry from a response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphqlErrorBody {
    pub message: String,
}

/// GraphQL response body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphqlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<GraphqlErrorBody>,
}

/// Network-level failure, carrying the HTTP status when there was one
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// 502 and 503 mean the indexer is temporarily down
    pub fn is_unavailable(&self) -> bool {
        matches!(self.status, Some(502) | Some(503))
    }
}

/// Executes GraphQL requests against an endpoint
#[async_trait]
pub trait GraphqlTransport: Send + Sync {
    async fn execute(
        &self,
        endpoint: &str,
        request: &GraphqlRequest,
    ) -> Result<GraphqlResponse, TransportError>;
}

/// [`GraphqlTransport`] over HTTP POST
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl GraphqlTransport for HttpTransport {
    async fn execute(
        &self,
        endpoint: &str,
        request: &GraphqlRequest,
    ) -> Result<GraphqlResponse, TransportError> {
        let response = self
            .client
            .post(endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::new(e.status().map(|s| s.as_u16()), e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::new(Some(status), format!("HTTP {} - {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| TransportError::new(None, e.to_string()))
    }
}

// ==================== Errors ====================

/// Which indexer a query goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subgraph {
    Orgs,
    Safes,
}

impl std::fmt::Display for Subgraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subgraph::Orgs => f.write_str("orgs"),
            Subgraph::Safes => f.write_str("multisig"),
        }
    }
}

/// Subgraph query errors
#[derive(Debug, Clone, Error)]
pub enum SubgraphError {
    /// The active network has no indexer
    #[error("Orgs are not available on the {environment} network")]
    FeatureUnavailableOnNetwork { environment: Environment },

    /// No endpoint configured for this subgraph on the active network
    #[error("No {subgraph} subgraph configured for the {environment} network")]
    NotConfigured {
        subgraph: Subgraph,
        environment: Environment,
    },

    /// Transient outage (HTTP 502/503)
    #[error("Subgraph {endpoint} unavailable (HTTP {status})")]
    UpstreamUnavailable { endpoint: String, status: u16 },

    /// Any other query, transport or parse failure
    #[error("Subgraph query against {endpoint} failed: {message}")]
    QueryFailed { endpoint: String, message: String },
}

impl SubgraphError {
    /// Classify a transport failure by its HTTP status
    pub fn from_transport(endpoint: &str, err: TransportError) -> Self {
        match err.status {
            Some(status) if err.is_unavailable() => SubgraphError::UpstreamUnavailable {
                endpoint: endpoint.to_string(),
                status,
            },
            _ => SubgraphError::QueryFailed {
                endpoint: endpoint.to_string(),
                message: err.message,
            },
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, SubgraphError::UpstreamUnavailable { .. })
    }

    fn query_failed(endpoint: &str, message: impl Into<String>) -> Self {
        SubgraphError::QueryFailed {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }
}

/// `true` if `err` comes from a 502 or 503 response of the indexer
pub fn is_unavailable_error(err: &SubgraphError) -> bool {
    err.is_unavailable()
}

// ==================== Types ====================

/// An org registered on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    /// Org contract address
    pub id: Address,
    /// Owner, usually a multisig wallet
    pub owner: Address,
    pub creator: Address,
    /// UNIX seconds
    pub timestamp: i64,
}

/// A confirmed anchor read from the indexer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChainAnchor {
    pub org_address: Address,
    pub transaction_id: String,
    pub project_id: ProjectUrn,
    pub commit_hash: CommitHash,
    /// UNIX seconds
    pub timestamp: i64,
}

/// An anchor whose ids failed to decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedAnchor {
    pub transaction_id: String,
    pub error: DecodeError,
}

/// All anchors of an org, split by whether they decoded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorBatch {
    pub anchors: Vec<OnChainAnchor>,
    pub malformed: Vec<MalformedAnchor>,
}

/// A multisig wallet and its owners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeWallet {
    pub id: Address,
    pub owners: Vec<Address>,
}

/// Owners and approval threshold of a multisig wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeMembers {
    pub threshold: u64,
    pub members: Vec<Address>,
}

/// The indexer serialises big integers as strings
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(i64),
    String(String),
}

fn de_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize)]
struct OrgsData {
    orgs: Vec<RawOrg>,
}

#[derive(Deserialize)]
struct RawOrg {
    id: Address,
    owner: Address,
    creator: Address,
    #[serde(deserialize_with = "de_number")]
    timestamp: i64,
}

#[derive(Deserialize)]
struct ProjectsData {
    projects: Vec<RawProject>,
}

#[derive(Deserialize)]
struct RawProject {
    anchor: RawAnchor,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAnchor {
    id: String,
    object_id: String,
    multihash: String,
    #[serde(deserialize_with = "de_number")]
    timestamp: i64,
}

impl RawAnchor {
    fn decode(self, org_address: Address) -> Result<OnChainAnchor, DecodeError> {
        let project_id = decode_project_urn(&bytes_from_hex(&self.object_id)?)?;
        let commit_hash = CommitHash::from_multihash(&bytes_from_hex(&self.multihash)?)?;
        Ok(OnChainAnchor {
            org_address,
            transaction_id: self.id,
            project_id,
            commit_hash,
            timestamp: self.timestamp,
        })
    }
}

#[derive(Deserialize)]
struct WalletsData {
    wallets: Vec<SafeWallet>,
}

#[derive(Deserialize)]
struct MembersData {
    wallets: Vec<RawMembers>,
}

#[derive(Deserialize)]
struct RawMembers {
    owners: Vec<Address>,
    #[serde(deserialize_with = "de_number")]
    threshold: i64,
}

// ==================== Client ====================

/// Query client for the orgs and multisig subgraphs of one network
pub struct SubgraphClient {
    transport: Arc<dyn GraphqlTransport>,
    environment: Environment,
    orgs_endpoint: Option<String>,
    safes_endpoint: Option<String>,
}

impl SubgraphClient {
    pub fn new(
        transport: Arc<dyn GraphqlTransport>,
        environment: Environment,
        orgs_endpoint: Option<String>,
        safes_endpoint: Option<String>,
    ) -> Self {
        Self {
            transport,
            environment,
            orgs_endpoint,
            safes_endpoint,
        }
    }

    /// Client for the network and endpoints selected in `config`
    pub fn from_config(transport: Arc<dyn GraphqlTransport>, config: &Config) -> Self {
        Self::new(
            transport,
            config.environment,
            config.orgs_subgraph(),
            config.safes_subgraph(),
        )
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    fn endpoint(&self, subgraph: Subgraph) -> Result<&str, SubgraphError> {
        if !self.environment.has_indexer() {
            return Err(SubgraphError::FeatureUnavailableOnNetwork {
                environment: self.environment,
            });
        }
        let endpoint = match subgraph {
            Subgraph::Orgs => self.orgs_endpoint.as_deref(),
            Subgraph::Safes => self.safes_endpoint.as_deref(),
        };
        endpoint.ok_or(SubgraphError::NotConfigured {
            subgraph,
            environment: self.environment,
        })
    }

    async fn query<T: DeserializeOwned>(
        &self,
        subgraph: Subgraph,
        query: &str,
        variables: Value,
    ) -> Result<T, SubgraphError> {
        let endpoint = self.endpoint(subgraph)?;
        let request = GraphqlRequest {
            query: query.to_string(),
            variables,
        };

        debug!(endpoint = %endpoint, %subgraph, "Querying subgraph");
        let response = self
            .transport
            .execute(endpoint, &request)
            .await
            .map_err(|e| {
                warn!(endpoint = %endpoint, status = ?e.status, error = %e, "Subgraph request failed");
                SubgraphError::from_transport(endpoint, e)
            })?;

        if !response.errors.is_empty() {
            let messages: Vec<_> = response.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(SubgraphError::query_failed(endpoint, messages.join("; ")));
        }

        let data = response
            .data
            .ok_or_else(|| SubgraphError::query_failed(endpoint, "response has no data"))?;
        serde_json::from_value(data).map_err(|e| SubgraphError::query_failed(endpoint, e.to_string()))
    }

    /// Orgs owned by any of `owners`
    pub async fn get_organizations(
        &self,
        owners: &BTreeSet<Address>,
    ) -> Result<Vec<Organization>, SubgraphError> {
        let owners: Vec<String> = owners.iter().map(Address::to_string).collect();
        let data: OrgsData = self
            .query(Subgraph::Orgs, GET_ORGS, json!({ "owners": owners }))
            .await?;

        Ok(data
            .orgs
            .into_iter()
            .map(|org| Organization {
                id: org.id,
                owner: org.owner,
                creator: org.creator,
                timestamp: org.timestamp,
            })
            .collect())
    }

    /// Anchors of an org. Anchors whose ids fail to decode are reported in
    /// [`AnchorBatch::malformed`] without affecting the others.
    pub async fn get_anchors(&self, org: &Address) -> Result<AnchorBatch, SubgraphError> {
        let data: ProjectsData = self
            .query(
                Subgraph::Orgs,
                GET_ORG_ANCHORS,
                json!({ "orgAddress": org.to_string() }),
            )
            .await?;

        let mut batch = AnchorBatch::default();
        for project in data.projects {
            let transaction_id = project.anchor.id.clone();
            match project.anchor.decode(*org) {
                Ok(anchor) => batch.anchors.push(anchor),
                Err(error) => {
                    warn!(org = %org, transaction = %transaction_id, error = %error, "Skipping malformed anchor");
                    batch.malformed.push(MalformedAnchor {
                        transaction_id,
                        error,
                    });
                }
            }
        }

        debug!(org = %org, anchors = batch.anchors.len(), malformed = batch.malformed.len(), "Fetched anchors");
        Ok(batch)
    }

    /// Multisig wallets `owner` is a member of
    pub async fn get_safe_wallets(&self, owner: &Address) -> Result<Vec<SafeWallet>, SubgraphError> {
        let data: WalletsData = self
            .query(
                Subgraph::Safes,
                GET_SAFE_WALLETS,
                json!({ "owners": [owner.to_string()] }),
            )
            .await?;
        Ok(data.wallets)
    }

    /// Owners and threshold of a multisig wallet
    pub async fn get_members(&self, safe: &Address) -> Result<SafeMembers, SubgraphError> {
        let endpoint = self.endpoint(Subgraph::Safes)?.to_string();
        let data: MembersData = self
            .query(Subgraph::Safes, GET_SAFE_MEMBERS, json!({ "id": safe.to_string() }))
            .await?;

        let wallet = data.wallets.into_iter().next().ok_or_else(|| {
            SubgraphError::query_failed(&endpoint, format!("no multisig wallet {}", safe))
        })?;
        let threshold = u64::try_from(wallet.threshold)
            .map_err(|_| SubgraphError::query_failed(&endpoint, "negative threshold"))?;

        Ok(SafeMembers {
            threshold,
            members: wallet.owners,
        })
    }
}
