//! org-anchors
//!
//! Inspect on-chain orgs from the command line and reconcile their anchors with the
//! local proxy.
//!
//! ## Usage
//!
//! ```bash
//! # Orgs owned by an address or by its multisig wallets
//! org-anchors orgs 0x3a4e4d2b9f2c6b1f0f7e6a5d4c3b2a1908f7e6d5
//!
//! # Decoded anchors of an org
//! org-anchors anchors 0xab58d6ce4c2fd470ddb87de62d90691f59bda6e9
//!
//! # Multisig members and their verified identities
//! org-anchors members 0x9e3a1f8b27c04d56e8a1b2c3d4e5f60718293a4b
//!
//! # Anchors split into resolved and unresolved projects
//! org-anchors --network mainnet reconcile 0xab58d6ce4c2fd470ddb87de62d90691f59bda6e9
//!
//! # Identity an address claims, if both sides agree
//! org-anchors verify 0x3a4e4d2b9f2c6b1f0f7e6a5d4c3b2a1908f7e6d5
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use org_anchors::config::default_config_path;
use org_anchors::{
    Address, Config, Environment, HttpTransport, OrgService, ProxyClient, ProxyConfig, Reconciler, RpcChain,
    SubgraphClient,
};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_RPC_URL: &str = "http://localhost:8545";

#[derive(Parser, Debug)]
#[command(name = "org-anchors")]
#[command(about = "Resolve on-chain org anchors against the local proxy")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ethereum network
    #[arg(long, env = "ORG_ANCHORS_NETWORK")]
    network: Option<Environment>,

    /// Local proxy API base URL
    #[arg(long, env = "ORG_ANCHORS_PROXY_URL")]
    proxy_url: Option<String>,

    /// Local proxy auth token
    #[arg(long, env = "ORG_ANCHORS_PROXY_TOKEN")]
    proxy_token: Option<String>,

    /// Ethereum JSON-RPC endpoint
    #[arg(long, env = "ETH_RPC_URL")]
    rpc_url: Option<String>,

    /// Claims registry contract address
    #[arg(long)]
    claims_address: Option<String>,

    /// Maximum concurrent proxy lookups
    #[arg(long)]
    max_concurrent: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List orgs owned by an address or its multisig wallets
    Orgs { owner: Address },
    /// List the decoded anchors of an org
    Anchors { org: Address },
    /// List multisig members with verified identities
    Members { safe: Address },
    /// Split an org's anchors into resolved and unresolved projects
    Reconcile { org: Address },
    /// Show the identity an address verifiably claims
    Verify { address: Address },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("org_anchors=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // Load config
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config = if config_path.exists() {
        Config::load(&config_path).with_context(|| format!("loading {}", config_path.display()))?
    } else {
        debug!(path = %config_path.display(), "No config file, using defaults");
        Config::default()
    };

    // Apply CLI overrides
    if let Some(network) = args.network {
        config.environment = network;
    }
    if let Some(url) = args.proxy_url {
        config.proxy_url = url;
    }
    if let Some(token) = args.proxy_token {
        config.proxy_auth_token = Some(token);
    }
    if let Some(max) = args.max_concurrent {
        config.max_concurrent_lookups = max;
    }

    let network = config.network();
    let rpc_url = args
        .rpc_url
        .or(network.rpc_url)
        .unwrap_or_else(|| DEFAULT_RPC_URL.to_string());
    let claims_address = args
        .claims_address
        .or(network.claims_address)
        .map(|address| address.parse::<Address>())
        .transpose()
        .context("invalid claims address")?;

    info!(
        network = %config.environment,
        proxy = %config.proxy_url,
        rpc = %rpc_url,
        "Starting org-anchors"
    );

    let transport = Arc::new(HttpTransport::new(config.request_timeout())?);
    let subgraph = Arc::new(SubgraphClient::from_config(transport, &config));
    let backend = Arc::new(ProxyClient::new(ProxyConfig {
        base_url: config.proxy_url.clone(),
        auth_token: config.proxy_auth_token.clone(),
        timeout_secs: config.request_timeout_secs,
    })?);
    let chain = Arc::new(RpcChain::new(rpc_url, claims_address, config.request_timeout())?);
    let reconciler = Arc::new(Reconciler::new(
        subgraph.clone(),
        backend,
        chain,
        config.max_concurrent_lookups,
    ));
    let orgs = OrgService::new(reconciler.clone());

    match args.command {
        Command::Orgs { owner } => print(&orgs.fetch_orgs(&owner).await?),
        Command::Anchors { org } => {
            let batch = subgraph.get_anchors(&org).await?;
            print(&json!({
                "anchors": batch.anchors,
                "malformed": malformed_json(&batch.malformed),
            }))
        }
        Command::Members { safe } => print(&orgs.fetch_members(&safe).await?),
        Command::Reconcile { org } => {
            let screen = orgs.fetch_org(&org).await?;
            let tab = orgs.resolve_project_anchors(&org).await?;
            print(&json!({
                "org": screen,
                "resolved": tab.resolved,
                "unresolved": tab.unresolved,
                "malformed": malformed_json(&tab.malformed),
            }))
        }
        Command::Verify { address } => print(&reconciler.verify_claimed_identity(&address).await),
    }
}

fn malformed_json(malformed: &[org_anchors::subgraph::MalformedAnchor]) -> serde_json::Value {
    malformed
        .iter()
        .map(|m| json!({ "transactionId": m.transaction_id, "error": m.error.to_string() }))
        .collect()
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
