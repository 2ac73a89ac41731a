//! On-chain org anchors, reconciled with local project state
//!
//! Reads the anchors an org recorded on chain from the orgs subgraph, decodes their
//! packed identifiers, and matches them against the projects the local proxy knows.
//! Also verifies the identities multisig members claim, and reads project source.
//!
//! # Example
//!
//! ```rust,no_run
//! use org_anchors::{Config, HttpTransport, OrgService, ProxyClient, ProxyConfig, Reconciler, RpcChain, SubgraphClient};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let config = Config::default();
//!
//! let transport = Arc::new(HttpTransport::new(config.request_timeout())?);
//! let subgraph = Arc::new(SubgraphClient::from_config(transport, &config));
//! let backend = Arc::new(ProxyClient::new(ProxyConfig {
//!     base_url: config.proxy_url.clone(),
//!     ..Default::default()
//! })?);
//! let chain = Arc::new(RpcChain::new("http://localhost:8545", None, config.request_timeout())?);
//!
//! let reconciler = Arc::new(Reconciler::new(subgraph, backend, chain, config.max_concurrent_lookups));
//! let orgs = OrgService::new(reconciler);
//!
//! let org = "0xab58d6ce4c2fd470ddb87de62d90691f59bda6e9".parse()?;
//! let tab = orgs.resolve_project_anchors(&org).await?;
//! println!("{} resolved, {} unresolved", tab.resolved.len(), tab.unresolved.len());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod contract;
pub mod error;
pub mod org;
pub mod reconcile;
pub mod remote;
pub mod source;
pub mod subgraph;

// Re-export main types
pub use backend::{Backend, BackendError, Identity, Project, ProxyClient, ProxyConfig};
pub use codec::{decode_multihash, decode_project_urn, hex_of_digest, Address, CommitHash, DecodeError, ProjectUrn};
pub use config::{Config, DayBoundary, Environment};
pub use contract::{ChainError, ChainReader, RpcChain};
pub use error::{Error, Result};
pub use org::{Member, MemberTab, OrgScreen, OrgService};
pub use reconcile::{Reconciler, Reconciliation, ResolvedAnchor};
pub use remote::{RemoteData, RemoteStore, Ticket};
pub use source::{group_commits, locate_readme, Commit, CommitGroup, CommitHistory, SourceObject, SourceReader};
pub use subgraph::{
    is_unavailable_error, GraphqlTransport, HttpTransport, OnChainAnchor, Organization, SubgraphClient, SubgraphError,
};
