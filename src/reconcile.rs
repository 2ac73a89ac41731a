//! Anchor reconciliation
//!
//! Matches the anchors an org recorded on chain against the projects the local proxy
//! knows about, and cross-checks identity claims between the claims registry and the
//! identities' own metadata.

use crate::backend::{Backend, BackendError, Identity, Project};
use crate::codec::{decode_project_urn, Address, DecodeError, ProjectUrn, WORD_LEN};
use crate::contract::ChainReader;
use crate::error::Result;
use crate::subgraph::{MalformedAnchor, OnChainAnchor, SubgraphClient};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An anchor whose project exists locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAnchor {
    #[serde(flatten)]
    pub project: Project,
    pub anchor: OnChainAnchor,
}

/// Outcome of reconciling one org's anchors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Anchors with a local project, in discovery order
    pub resolved: Vec<ResolvedAnchor>,
    /// Anchors the proxy does not know, in discovery order
    pub unresolved: Vec<OnChainAnchor>,
    /// Anchors whose ids failed to decode
    pub malformed: Vec<MalformedAnchor>,
}

impl Reconciliation {
    /// Number of decoded anchors
    pub fn len(&self) -> usize {
        self.resolved.len() + self.unresolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.malformed.is_empty()
    }
}

enum Lookup {
    Resolved(ResolvedAnchor),
    Unresolved(OnChainAnchor),
}

/// Reconciles on-chain anchors and identity claims with local state
pub struct Reconciler {
    subgraph: Arc<SubgraphClient>,
    backend: Arc<dyn Backend>,
    chain: Arc<dyn ChainReader>,
    max_concurrent: usize,
}

impl Reconciler {
    pub fn new(
        subgraph: Arc<SubgraphClient>,
        backend: Arc<dyn Backend>,
        chain: Arc<dyn ChainReader>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            subgraph,
            backend,
            chain,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn subgraph(&self) -> &SubgraphClient {
        &self.subgraph
    }

    pub fn chain(&self) -> &dyn ChainReader {
        self.chain.as_ref()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Partition an org's anchors into resolved and unresolved.
    ///
    /// Only a not-found answer from the proxy marks an anchor unresolved. Any other
    /// lookup failure aborts the pass.
    pub async fn reconcile(&self, org: &Address) -> Result<Reconciliation> {
        let batch = self.subgraph.get_anchors(org).await?;

        let lookups: Vec<Lookup> = stream::iter(batch.anchors)
            .map(|anchor| self.lookup(anchor))
            .buffered(self.max_concurrent)
            .try_collect()
            .await?;

        let mut reconciliation = Reconciliation {
            malformed: batch.malformed,
            ..Default::default()
        };
        for lookup in lookups {
            match lookup {
                Lookup::Resolved(resolved) => reconciliation.resolved.push(resolved),
                Lookup::Unresolved(anchor) => reconciliation.unresolved.push(anchor),
            }
        }

        info!(
            org = %org,
            resolved = reconciliation.resolved.len(),
            unresolved = reconciliation.unresolved.len(),
            malformed = reconciliation.malformed.len(),
            "Reconciled anchors"
        );
        Ok(reconciliation)
    }

    async fn lookup(&self, anchor: OnChainAnchor) -> Result<Lookup> {
        match self.backend.project(&anchor.project_id).await {
            Ok(project) => Ok(Lookup::Resolved(ResolvedAnchor { project, anchor })),
            Err(BackendError::NotFound(_)) => {
                debug!(project = %anchor.project_id, "Anchored project not known locally");
                Ok(Lookup::Unresolved(anchor))
            }
            Err(err) => {
                warn!(project = %anchor.project_id, error = %err, "Project lookup failed");
                Err(err.into())
            }
        }
    }

    /// Identity claimed by `address`, if the claim and the identity agree.
    ///
    /// Every failure on the way yields `None`.
    pub async fn verify_claimed_identity(&self, address: &Address) -> Option<Identity> {
        let claim = match self.chain.get_claimed(address).await {
            Ok(Some(claim)) => claim,
            Ok(None) => return None,
            Err(err) => {
                debug!(address = %address, error = %err, "Claim lookup failed");
                return None;
            }
        };

        let urn = match claimed_urn(&claim) {
            Ok(urn) => urn,
            Err(err) => {
                debug!(address = %address, error = %err, "Claim does not hold an identity id");
                return None;
            }
        };

        let identity = match self.backend.identity(&urn).await {
            Ok(identity) => identity,
            Err(err) => {
                debug!(address = %address, urn = %urn, error = %err, "Claimed identity unavailable");
                return None;
            }
        };

        let declared = identity
            .metadata
            .ethereum
            .as_ref()
            .map(|claim| claim.address.to_ascii_lowercase());
        if declared.as_deref() != Some(address.to_string().as_str()) {
            debug!(address = %address, urn = %urn, "Identity does not claim this address");
            return None;
        }
        Some(identity)
    }
}

/// Claims hold either the bare SHA1 digest or its padded 32-byte word
fn claimed_urn(claim: &[u8]) -> std::result::Result<ProjectUrn, DecodeError> {
    if claim.len() == WORD_LEN {
        decode_project_urn(claim)
    } else {
        ProjectUrn::from_digest(claim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        Blob, CommitRecord, CommitSummary, EthereumClaim, IdentityMetadata, ProjectMetadata, Revision, Tree,
    };
    use crate::codec::CommitHash;
    use crate::config::Environment;
    use crate::contract::ChainError;
    use crate::error::Error;
    use crate::subgraph::{GraphqlRequest, GraphqlResponse, GraphqlTransport, TransportError};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ORG: &str = "0xab58d6ce4c2fd470ddb87de62d90691f59bda6e9";
    const MEMBER: &str = "0x3a4e4d2b9f2c6b1f0f7e6a5d4c3b2a1908f7e6d5";

    struct StaticTransport(Value);

    #[async_trait]
    impl GraphqlTransport for StaticTransport {
        async fn execute(
            &self,
            _endpoint: &str,
            _request: &GraphqlRequest,
        ) -> std::result::Result<GraphqlResponse, TransportError> {
            Ok(GraphqlResponse {
                data: Some(self.0.clone()),
                errors: vec![],
            })
        }
    }

    #[derive(Default)]
    struct MockBackend {
        projects: HashMap<ProjectUrn, Project>,
        identities: HashMap<ProjectUrn, Identity>,
        failing: Option<ProjectUrn>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl Backend for MockBackend {
        async fn project(&self, urn: &ProjectUrn) -> std::result::Result<Project, BackendError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.as_ref() == Some(urn) {
                return Err(BackendError::Server {
                    status: 500,
                    variant: "INTERNAL".into(),
                    message: "storage offline".into(),
                });
            }
            self.projects
                .get(urn)
                .cloned()
                .ok_or_else(|| BackendError::NotFound(urn.to_string()))
        }

        async fn identity(&self, urn: &ProjectUrn) -> std::result::Result<Identity, BackendError> {
            self.identities
                .get(urn)
                .cloned()
                .ok_or_else(|| BackendError::NotFound(urn.to_string()))
        }

        async fn commit(&self, _: &ProjectUrn, sha1: &str) -> std::result::Result<CommitRecord, BackendError> {
            Err(BackendError::NotFound(sha1.into()))
        }

        async fn commits(&self, _: &ProjectUrn, branch: &str) -> std::result::Result<Vec<CommitSummary>, BackendError> {
            Err(BackendError::NotFound(branch.into()))
        }

        async fn revisions(&self, urn: &ProjectUrn) -> std::result::Result<Vec<Revision>, BackendError> {
            Err(BackendError::NotFound(urn.to_string()))
        }

        async fn tree(&self, _: &ProjectUrn, _: &str, prefix: &str) -> std::result::Result<Tree, BackendError> {
            Err(BackendError::NotFound(prefix.into()))
        }

        async fn blob(&self, _: &ProjectUrn, _: &str, path: &str) -> std::result::Result<Blob, BackendError> {
            Err(BackendError::NotFound(path.into()))
        }

        async fn local_branches(&self, path: &str) -> std::result::Result<Vec<String>, BackendError> {
            Err(BackendError::NotFound(path.into()))
        }
    }

    #[derive(Default)]
    struct MockChain {
        claims: HashMap<Address, Vec<u8>>,
        broken: bool,
    }

    #[async_trait]
    impl ChainReader for MockChain {
        async fn org_owner(&self, org: &Address) -> std::result::Result<Address, ChainError> {
            Ok(*org)
        }

        async fn get_claimed(&self, address: &Address) -> std::result::Result<Option<Vec<u8>>, ChainError> {
            if self.broken {
                return Err(ChainError::Rpc {
                    endpoint: "mock".into(),
                    message: "unreachable".into(),
                });
            }
            Ok(self.claims.get(address).cloned())
        }
    }

    fn project(urn: ProjectUrn, name: &str) -> Project {
        Project {
            urn,
            shareable_entity_identifier: None,
            metadata: ProjectMetadata {
                name: name.into(),
                description: String::new(),
                default_branch: "master".into(),
                maintainers: vec![],
            },
            stats: None,
        }
    }

    fn identity(urn: ProjectUrn, address: Option<&str>) -> Identity {
        Identity {
            urn,
            peer_id: None,
            metadata: IdentityMetadata {
                handle: "cloudhead".into(),
                ethereum: address.map(|address| EthereumClaim {
                    address: address.into(),
                    expiration: None,
                }),
            },
        }
    }

    fn anchor_json(id: &str, urn: &ProjectUrn, timestamp: i64) -> Value {
        let mut multihash = vec![0x11, 0x14];
        multihash.extend_from_slice(&[0xcd; 20]);
        json!({
            "anchor": {
                "id": id,
                "objectId": format!("0x{}", hex::encode(urn.to_object_id())),
                "multihash": format!("0x{}", hex::encode(multihash)),
                "timestamp": timestamp.to_string(),
            }
        })
    }

    fn subgraph(anchors: Vec<Value>) -> Arc<SubgraphClient> {
        let transport = Arc::new(StaticTransport(json!({ "projects": anchors })));
        Arc::new(SubgraphClient::new(
            transport,
            Environment::Rinkeby,
            Some("http://orgs.test".into()),
            Some("http://safes.test".into()),
        ))
    }

    fn reconciler(anchors: Vec<Value>, backend: MockBackend, chain: MockChain) -> Reconciler {
        Reconciler::new(subgraph(anchors), Arc::new(backend), Arc::new(chain), 8)
    }

    fn org() -> Address {
        ORG.parse().unwrap()
    }

    #[tokio::test]
    async fn test_partitions_resolved_and_unresolved() {
        let a = ProjectUrn::from_metadata(b"project-a");
        let b = ProjectUrn::from_metadata(b"project-b");

        let mut backend = MockBackend::default();
        backend.projects.insert(a, project(a, "a"));

        let reconciler = self::reconciler(
            vec![anchor_json("0x01", &a, 1), anchor_json("0x02", &b, 2)],
            backend,
            MockChain::default(),
        );
        let result = reconciler.reconcile(&org()).await.unwrap();

        assert_eq!(result.resolved.len(), 1);
        assert_eq!(result.resolved[0].project.urn, a);
        assert_eq!(result.resolved[0].anchor.timestamp, 1);
        assert_eq!(result.unresolved.len(), 1);
        assert_eq!(result.unresolved[0].project_id, b);
        assert_eq!(result.unresolved[0].timestamp, 2);
        assert_eq!(result.len(), 2);
        assert_eq!(result.unresolved[0].commit_hash, CommitHash::from_bytes(&[0xcd; 20]).unwrap());
    }

    #[tokio::test]
    async fn test_preserves_discovery_order_within_partition() {
        let urns: Vec<ProjectUrn> = (0..12u8).map(|i| ProjectUrn::from_metadata(&[i])).collect();

        let mut backend = MockBackend::default();
        for urn in urns.iter().step_by(2) {
            backend.projects.insert(*urn, project(*urn, "even"));
        }
        let anchors = urns
            .iter()
            .enumerate()
            .map(|(i, urn)| anchor_json(&format!("0x{:02x}", i), urn, i as i64))
            .collect();

        let reconciler = self::reconciler(anchors, backend, MockChain::default());
        let result = reconciler.reconcile(&org()).await.unwrap();

        let resolved: Vec<i64> = result.resolved.iter().map(|r| r.anchor.timestamp).collect();
        let unresolved: Vec<i64> = result.unresolved.iter().map(|a| a.timestamp).collect();
        assert_eq!(resolved, vec![0, 2, 4, 6, 8, 10]);
        assert_eq!(unresolved, vec![1, 3, 5, 7, 9, 11]);
    }

    #[tokio::test]
    async fn test_lookups_are_bounded() {
        let urns: Vec<ProjectUrn> = (0..20u8).map(|i| ProjectUrn::from_metadata(&[i])).collect();
        let anchors = urns.iter().map(|urn| anchor_json("0x01", urn, 1)).collect();

        let backend = Arc::new(MockBackend::default());
        let reconciler = Reconciler::new(subgraph(anchors), backend.clone(), Arc::new(MockChain::default()), 3);
        let result = reconciler.reconcile(&org()).await.unwrap();

        assert_eq!(result.unresolved.len(), 20);
        assert!(backend.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_non_not_found_failure_propagates() {
        let a = ProjectUrn::from_metadata(b"project-a");
        let b = ProjectUrn::from_metadata(b"project-b");

        let backend = MockBackend {
            failing: Some(b),
            ..Default::default()
        };
        let reconciler = self::reconciler(
            vec![anchor_json("0x01", &a, 1), anchor_json("0x02", &b, 2)],
            backend,
            MockChain::default(),
        );

        let err = reconciler.reconcile(&org()).await.unwrap_err();
        assert!(matches!(err, Error::Backend(BackendError::Server { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_malformed_anchor_does_not_abort_siblings() {
        let a = ProjectUrn::from_metadata(b"project-a");
        let mut broken = anchor_json("0x02", &a, 2);
        broken["anchor"]["multihash"] = json!("0x1114abcd");

        let reconciler = self::reconciler(
            vec![anchor_json("0x01", &a, 1), broken],
            MockBackend::default(),
            MockChain::default(),
        );
        let result = reconciler.reconcile(&org()).await.unwrap();

        assert_eq!(result.unresolved.len(), 1);
        assert_eq!(result.malformed.len(), 1);
        assert_eq!(result.malformed[0].transaction_id, "0x02");
    }

    #[tokio::test]
    async fn test_verify_without_claim() {
        let reconciler = self::reconciler(vec![], MockBackend::default(), MockChain::default());
        let member: Address = MEMBER.parse().unwrap();
        assert!(reconciler.verify_claimed_identity(&member).await.is_none());
    }

    #[tokio::test]
    async fn test_verify_matching_claim_case_insensitive() {
        let member: Address = MEMBER.parse().unwrap();
        let urn = ProjectUrn::from_metadata(b"cloudhead");

        let mut backend = MockBackend::default();
        backend
            .identities
            .insert(urn, identity(urn, Some(&MEMBER.to_ascii_uppercase().replace("0X", "0x"))));
        let mut chain = MockChain::default();
        chain.claims.insert(member, urn.digest().to_vec());

        let reconciler = self::reconciler(vec![], backend, chain);
        let verified = reconciler.verify_claimed_identity(&member).await.unwrap();
        assert_eq!(verified.urn, urn);
    }

    #[tokio::test]
    async fn test_verify_accepts_padded_claim() {
        let member: Address = MEMBER.parse().unwrap();
        let urn = ProjectUrn::from_metadata(b"cloudhead");

        let mut backend = MockBackend::default();
        backend.identities.insert(urn, identity(urn, Some(MEMBER)));
        let mut chain = MockChain::default();
        chain.claims.insert(member, urn.to_object_id().to_vec());

        let reconciler = self::reconciler(vec![], backend, chain);
        assert!(reconciler.verify_claimed_identity(&member).await.is_some());
    }

    #[tokio::test]
    async fn test_verify_mismatched_address() {
        let member: Address = MEMBER.parse().unwrap();
        let urn = ProjectUrn::from_metadata(b"cloudhead");

        let mut backend = MockBackend::default();
        backend.identities.insert(urn, identity(urn, Some(ORG)));
        let mut chain = MockChain::default();
        chain.claims.insert(member, urn.digest().to_vec());

        let reconciler = self::reconciler(vec![], backend, chain);
        assert!(reconciler.verify_claimed_identity(&member).await.is_none());
    }

    #[tokio::test]
    async fn test_verify_swallows_failures() {
        let member: Address = MEMBER.parse().unwrap();

        // unknown identity
        let mut chain = MockChain::default();
        chain.claims.insert(member, ProjectUrn::from_metadata(b"x").digest().to_vec());
        let reconciler = self::reconciler(vec![], MockBackend::default(), chain);
        assert!(reconciler.verify_claimed_identity(&member).await.is_none());

        // undecodable claim
        let mut chain = MockChain::default();
        chain.claims.insert(member, vec![1, 2, 3]);
        let reconciler = self::reconciler(vec![], MockBackend::default(), chain);
        assert!(reconciler.verify_claimed_identity(&member).await.is_none());

        // registry unreachable
        let chain = MockChain {
            broken: true,
            ..Default::default()
        };
        let reconciler = self::reconciler(vec![], MockBackend::default(), chain);
        assert!(reconciler.verify_claimed_identity(&member).await.is_none());
    }
}
