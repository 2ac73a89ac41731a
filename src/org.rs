//! Org screens
//!
//! Fetch functions for the org sidebar, the org screen and its members and projects
//! tabs. Each fetch writes only to its own store.

use crate::backend::Identity;
use crate::codec::Address;
use crate::error::Error;
use crate::reconcile::{Reconciler, Reconciliation};
use crate::remote::{RemoteData, RemoteStore};
use crate::subgraph::{Organization, Subgraph, SubgraphError};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// The org currently on screen and the multisig wallet that owns it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgScreen {
    pub org_address: Address,
    pub safe_address: Address,
}

/// A multisig owner and the identity it verifiably claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub ethereum_address: Address,
    pub identity: Option<Identity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberTab {
    pub safe_address: Address,
    pub threshold: u64,
    pub members: Vec<Member>,
}

/// Org data fetches and the stores they fill
pub struct OrgService {
    reconciler: Arc<Reconciler>,
    screen: watch::Sender<Option<OrgScreen>>,
    sidebar: RemoteStore<Vec<Organization>>,
    members: RemoteStore<MemberTab>,
    projects: RemoteStore<Reconciliation>,
}

impl OrgService {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        let (screen, _rx) = watch::channel(None);
        Self {
            reconciler,
            screen,
            sidebar: RemoteStore::new("org_sidebar"),
            members: RemoteStore::new("org_members"),
            projects: RemoteStore::new("org_projects"),
        }
    }

    pub fn screen(&self) -> watch::Receiver<Option<OrgScreen>> {
        self.screen.subscribe()
    }

    pub fn sidebar(&self) -> &RemoteStore<Vec<Organization>> {
        &self.sidebar
    }

    pub fn members(&self) -> &RemoteStore<MemberTab> {
        &self.members
    }

    pub fn projects(&self) -> &RemoteStore<Reconciliation> {
        &self.projects
    }

    /// Orgs owned by `owner` directly or by any multisig wallet `owner` belongs to
    pub async fn fetch_orgs(&self, owner: &Address) -> Result<Vec<Organization>, Arc<Error>> {
        let ticket = self.sidebar.loading();
        let result = self.load_orgs(owner).await;
        self.sidebar.finish(ticket, result)
    }

    async fn load_orgs(&self, owner: &Address) -> Result<Vec<Organization>, Error> {
        let subgraph = self.reconciler.subgraph();
        let wallets = match subgraph.get_safe_wallets(owner).await {
            Ok(wallets) => wallets,
            Err(SubgraphError::NotConfigured {
                subgraph: Subgraph::Safes,
                environment,
            }) => {
                debug!(owner = %owner, network = %environment, "No multisig subgraph, listing directly owned orgs");
                Vec::new()
            }
            Err(err) => return Err(err.into()),
        };

        let mut owners = BTreeSet::from([*owner]);
        owners.extend(wallets.iter().map(|wallet| wallet.id));
        debug!(owner = %owner, wallets = wallets.len(), "Looking up orgs");

        Ok(subgraph.get_organizations(&owners).await?)
    }

    /// Put `org` on screen, reading its owner from chain unless it is already there
    pub async fn fetch_org(&self, org: &Address) -> Result<OrgScreen, Arc<Error>> {
        if let Some(current) = *self.screen.borrow() {
            if current.org_address == *org {
                debug!(org = %org, "Org already loaded");
                return Ok(current);
            }
        }

        let safe_address = self
            .reconciler
            .chain()
            .org_owner(org)
            .await
            .map_err(|e| Arc::new(Error::from(e)))?;

        let screen = OrgScreen {
            org_address: *org,
            safe_address,
        };
        self.screen.send_replace(Some(screen));
        info!(org = %org, safe = %safe_address, "Loaded org");
        Ok(screen)
    }

    /// Owners of a multisig wallet with their verified identities
    pub async fn fetch_members(&self, safe: &Address) -> Result<MemberTab, Arc<Error>> {
        let ticket = self.members.loading();
        let result = self.load_members(safe).await;
        self.members.finish(ticket, result)
    }

    async fn load_members(&self, safe: &Address) -> Result<MemberTab, Error> {
        let response = self.reconciler.subgraph().get_members(safe).await?;

        let members = stream::iter(response.members)
            .map(|ethereum_address| async move {
                let identity = self.reconciler.verify_claimed_identity(&ethereum_address).await;
                Member {
                    ethereum_address,
                    identity,
                }
            })
            .buffered(self.reconciler.max_concurrent())
            .collect()
            .await;

        Ok(MemberTab {
            safe_address: *safe,
            threshold: response.threshold,
            members,
        })
    }

    /// Reconcile the org's anchors into the projects tab
    pub async fn resolve_project_anchors(&self, org: &Address) -> Result<Reconciliation, Arc<Error>> {
        let ticket = self.projects.loading();
        let result = self.reconciler.reconcile(org).await;
        self.projects.finish(ticket, result)
    }

    /// Current projects tab state
    pub fn project_tab(&self) -> RemoteData<Reconciliation> {
        self.projects.get()
    }
}
