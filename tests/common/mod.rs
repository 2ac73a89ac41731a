//! In-memory indexer, proxy and chain shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use org_anchors::backend::{
    Blob, CommitRecord, CommitSummary, EthereumClaim, IdentityMetadata, Info, ObjectType, Person, ProjectMetadata,
    Revision, SourceEntry, Tree,
};
use org_anchors::contract::ChainError;
use org_anchors::subgraph::{GraphqlRequest, GraphqlResponse, TransportError};
use org_anchors::{
    hex_of_digest, Address, Backend, BackendError, ChainReader, Environment, GraphqlTransport, Identity, Project,
    ProjectUrn, Reconciler, SubgraphClient,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const ORG: &str = "0xab58d6ce4c2fd470ddb87de62d90691f59bda6e9";
pub const SAFE: &str = "0x9e3a1f8b27c04d56e8a1b2c3d4e5f60718293a4b";
pub const ALICE: &str = "0x3a4e4d2b9f2c6b1f0f7e6a5d4c3b2a1908f7e6d5";
pub const BOB: &str = "0x5f8c2b7e1d9a4c3b6e0f1a2b3c4d5e6f70819a2b";

pub fn addr(s: &str) -> Address {
    s.parse().unwrap()
}

// =============================================================================
// Indexer
// =============================================================================

#[derive(Default)]
pub struct FakeIndexer {
    pub orgs: Vec<Value>,
    pub anchors: Vec<Value>,
    pub wallets: Vec<Value>,
    pub members: Option<Value>,
    /// Fail every request with this HTTP status
    pub status: Option<u16>,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<GraphqlRequest>>,
}

impl FakeIndexer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_variables(&self) -> Option<Value> {
        self.requests.lock().unwrap().last().map(|r| r.variables.clone())
    }
}

#[async_trait]
impl GraphqlTransport for FakeIndexer {
    async fn execute(&self, _endpoint: &str, request: &GraphqlRequest) -> Result<GraphqlResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        if let Some(status) = self.status {
            return Err(TransportError::new(Some(status), format!("HTTP {}", status)));
        }

        let data = if request.query.contains("GetOrgs") {
            json!({ "orgs": self.orgs })
        } else if request.query.contains("GetOrgAnchoredProjects") {
            json!({ "projects": self.anchors })
        } else if request.query.contains("GetGnosisSafeWallets") {
            json!({ "wallets": self.wallets })
        } else if request.query.contains("GetGnosisSafeMembers") {
            json!({ "wallets": self.members.iter().collect::<Vec<_>>() })
        } else {
            return Err(TransportError::new(Some(400), "unknown query"));
        };

        Ok(GraphqlResponse {
            data: Some(data),
            errors: vec![],
        })
    }
}

pub fn anchor_json(id: &str, urn: &ProjectUrn, timestamp: i64) -> Value {
    let mut multihash = vec![0x11, 0x14];
    multihash.extend_from_slice(&[0x5a; 20]);
    json!({
        "anchor": {
            "id": id,
            "objectId": format!("0x{}", hex_of_digest(&urn.to_object_id())),
            "multihash": format!("0x{}", hex_of_digest(&multihash)),
            "timestamp": timestamp.to_string(),
        }
    })
}

pub fn org_json(id: &str, owner: &str, timestamp: i64) -> Value {
    json!({ "id": id, "owner": owner, "creator": owner, "timestamp": timestamp.to_string() })
}

// =============================================================================
// Proxy
// =============================================================================

#[derive(Default)]
pub struct FakeProxy {
    pub projects: HashMap<ProjectUrn, Project>,
    pub identities: HashMap<ProjectUrn, Identity>,
    pub commits: HashMap<String, CommitRecord>,
    pub histories: HashMap<String, Vec<CommitSummary>>,
    pub revisions: Vec<Revision>,
    pub trees: HashMap<String, Tree>,
    pub blobs: HashMap<String, Blob>,
    pub local_branches: HashMap<String, Vec<String>>,
    /// Projects whose lookup fails with a server error
    pub broken: Vec<ProjectUrn>,
    pub blob_calls: AtomicUsize,
}

fn not_found(what: impl ToString) -> BackendError {
    BackendError::NotFound(what.to_string())
}

#[async_trait]
impl Backend for FakeProxy {
    async fn project(&self, urn: &ProjectUrn) -> Result<Project, BackendError> {
        if self.broken.contains(urn) {
            return Err(BackendError::Server {
                status: 500,
                variant: "INTERNAL".into(),
                message: "monorepo locked".into(),
            });
        }
        self.projects.get(urn).cloned().ok_or_else(|| not_found(urn))
    }

    async fn identity(&self, urn: &ProjectUrn) -> Result<Identity, BackendError> {
        self.identities.get(urn).cloned().ok_or_else(|| not_found(urn))
    }

    async fn commit(&self, _project: &ProjectUrn, sha1: &str) -> Result<CommitRecord, BackendError> {
        self.commits.get(sha1).cloned().ok_or_else(|| not_found(sha1))
    }

    async fn commits(&self, _project: &ProjectUrn, branch: &str) -> Result<Vec<CommitSummary>, BackendError> {
        self.histories.get(branch).cloned().ok_or_else(|| not_found(branch))
    }

    async fn revisions(&self, _project: &ProjectUrn) -> Result<Vec<Revision>, BackendError> {
        Ok(self.revisions.clone())
    }

    async fn tree(&self, _project: &ProjectUrn, _revision: &str, prefix: &str) -> Result<Tree, BackendError> {
        self.trees.get(prefix).cloned().ok_or_else(|| not_found(prefix))
    }

    async fn blob(&self, _project: &ProjectUrn, _revision: &str, path: &str) -> Result<Blob, BackendError> {
        self.blob_calls.fetch_add(1, Ordering::SeqCst);
        self.blobs.get(path).cloned().ok_or_else(|| not_found(path))
    }

    async fn local_branches(&self, path: &str) -> Result<Vec<String>, BackendError> {
        self.local_branches.get(path).cloned().ok_or_else(|| not_found(path))
    }
}

pub fn project(urn: ProjectUrn, name: &str) -> Project {
    Project {
        urn,
        shareable_entity_identifier: None,
        metadata: ProjectMetadata {
            name: name.into(),
            description: format!("{} project", name),
            default_branch: "master".into(),
            maintainers: vec![],
        },
        stats: None,
    }
}

pub fn identity(urn: ProjectUrn, handle: &str, ethereum: Option<&str>) -> Identity {
    Identity {
        urn,
        peer_id: Some("hyy5s7ysg96fqa91gbe7h38yddh4mkokft7xcq9sfuj7xh3bzf8mmz".into()),
        metadata: IdentityMetadata {
            handle: handle.into(),
            ethereum: ethereum.map(|address| EthereumClaim {
                address: address.into(),
                expiration: None,
            }),
        },
    }
}

pub fn person() -> Person {
    Person {
        name: "Rūdolfs Ošiņš".into(),
        email: "rudolfs@osins.org".into(),
        avatar: None,
    }
}

pub fn summary(sha1: &str, committer_time: i64) -> CommitSummary {
    CommitSummary {
        sha1: sha1.into(),
        author: person(),
        committer: person(),
        committer_time,
        summary: format!("commit {}", sha1),
        description: String::new(),
    }
}

pub fn info(name: &str, object_type: ObjectType) -> Info {
    Info {
        name: name.into(),
        object_type,
        last_commit: None,
    }
}

pub fn entry(path: &str, object_type: ObjectType) -> SourceEntry {
    let name = path.rsplit('/').next().unwrap_or(path);
    SourceEntry {
        path: path.into(),
        info: info(name, object_type),
    }
}

pub fn tree(path: &str, entries: Vec<SourceEntry>) -> Tree {
    Tree {
        path: path.into(),
        info: info(path, ObjectType::Tree),
        entries,
    }
}

pub fn blob(path: &str, content: &str, binary: bool) -> Blob {
    Blob {
        path: path.into(),
        info: info(path, ObjectType::Blob),
        binary,
        content: content.into(),
    }
}

// =============================================================================
// Chain
// =============================================================================

#[derive(Default)]
pub struct FakeChain {
    pub owners: HashMap<Address, Address>,
    pub claims: HashMap<Address, Vec<u8>>,
    pub owner_calls: AtomicUsize,
}

impl FakeChain {
    pub fn owner_calls(&self) -> usize {
        self.owner_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn org_owner(&self, org: &Address) -> Result<Address, ChainError> {
        self.owner_calls.fetch_add(1, Ordering::SeqCst);
        self.owners.get(org).copied().ok_or(ChainError::Rpc {
            endpoint: "fake".into(),
            message: "execution reverted".into(),
        })
    }

    async fn get_claimed(&self, address: &Address) -> Result<Option<Vec<u8>>, ChainError> {
        Ok(self.claims.get(address).cloned())
    }
}

// =============================================================================
// Wiring
// =============================================================================

pub fn reconciler(
    indexer: Arc<FakeIndexer>,
    proxy: Arc<FakeProxy>,
    chain: Arc<FakeChain>,
    environment: Environment,
) -> Arc<Reconciler> {
    let subgraph = SubgraphClient::new(
        indexer,
        environment,
        Some("http://orgs.test/graphql".into()),
        Some("http://safes.test/graphql".into()),
    );
    Arc::new(Reconciler::new(Arc::new(subgraph), proxy, chain, 4))
}
