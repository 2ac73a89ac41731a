//! Configuration for org-anchors

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Ethereum network the active wallet is connected to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development chain, no indexer
    Local,
    Ropsten,
    Rinkeby,
    Mainnet,
}

impl Default for Environment {
    fn default() -> Self {
        Self::Rinkeby
    }
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Ropsten => "ropsten",
            Environment::Rinkeby => "rinkeby",
            Environment::Mainnet => "mainnet",
        }
    }

    /// Whether an indexer exists for this network at all
    pub fn has_indexer(&self) -> bool {
        !matches!(self, Environment::Local)
    }

    /// Built-in orgs subgraph endpoint
    pub fn default_orgs_subgraph(&self) -> Option<&'static str> {
        match self {
            Environment::Local => None,
            Environment::Ropsten => {
                Some("https://api.thegraph.com/subgraphs/name/radicle-dev/radicle-orgs-ropsten")
            }
            Environment::Rinkeby => {
                Some("https://api.thegraph.com/subgraphs/name/radicle-dev/radicle-orgs-rinkeby")
            }
            Environment::Mainnet => Some(
                "https://gateway.thegraph.com/api/1758a78ae257ad4906f9c638e4a68c19/subgraphs/id/0x2f0963e77ca6ac0c2dad1bf4147b6b40e0dd8728-0",
            ),
        }
    }

    /// Built-in multisig wallet subgraph endpoint
    pub fn default_safes_subgraph(&self) -> Option<&'static str> {
        match self {
            Environment::Ropsten => {
                Some("https://api.thegraph.com/subgraphs/name/radicle-dev/gnosis-safe-ropsten")
            }
            Environment::Rinkeby => {
                Some("https://api.thegraph.com/subgraphs/name/radicle-dev/gnosis-safe-rinkeby")
            }
            Environment::Local | Environment::Mainnet => None,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Environment::Local),
            "ropsten" => Ok(Environment::Ropsten),
            "rinkeby" => Ok(Environment::Rinkeby),
            "mainnet" => Ok(Environment::Mainnet),
            other => Err(format!("unknown network: {}", other)),
        }
    }
}

/// How commit history is split into days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayBoundary {
    /// Compare day, month and year independently (historical behaviour)
    Components,
    /// Compare whole calendar dates
    Calendar,
}

impl Default for DayBoundary {
    fn default() -> Self {
        Self::Components
    }
}

/// Per-network endpoint overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Orgs subgraph URL (falls back to the built-in one)
    #[serde(default)]
    pub orgs_subgraph: Option<String>,

    /// Multisig wallet subgraph URL (falls back to the built-in one)
    #[serde(default)]
    pub safes_subgraph: Option<String>,

    /// Ethereum JSON-RPC endpoint for contract reads
    #[serde(default)]
    pub rpc_url: Option<String>,

    /// Claims registry contract address
    #[serde(default)]
    pub claims_address: Option<String>,
}

/// Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Network of the active wallet
    #[serde(default)]
    pub environment: Environment,

    /// Local proxy API base URL
    #[serde(default = "default_proxy_url")]
    pub proxy_url: String,

    /// Auth token sent to the proxy
    #[serde(default)]
    pub proxy_auth_token: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum concurrent project/identity lookups per reconciliation
    #[serde(default = "default_max_concurrent_lookups")]
    pub max_concurrent_lookups: usize,

    /// Branches never shown in revision lists
    #[serde(default = "default_hidden_branches")]
    pub hidden_branches: Vec<String>,

    /// Branch label given to commits the proxy returns without one
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Commit history day grouping rule
    #[serde(default)]
    pub day_boundary: DayBoundary,

    /// Endpoint overrides keyed by network name
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
}

/// Default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("org-anchors")
        .join("config.toml")
}

fn default_proxy_url() -> String {
    "http://localhost:17246".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_concurrent_lookups() -> usize {
    8
}

fn default_hidden_branches() -> Vec<String> {
    vec!["rad/contributor".to_string(), "rad/project".to_string()]
}

fn default_branch() -> String {
    "master".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            proxy_url: default_proxy_url(),
            proxy_auth_token: None,
            request_timeout_secs: default_request_timeout(),
            max_concurrent_lookups: default_max_concurrent_lookups(),
            hidden_branches: default_hidden_branches(),
            default_branch: default_branch(),
            day_boundary: DayBoundary::default(),
            networks: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Overrides for the active network
    pub fn network(&self) -> NetworkConfig {
        self.networks
            .get(self.environment.as_str())
            .cloned()
            .unwrap_or_default()
    }

    /// Orgs subgraph URL for the active network, override first
    pub fn orgs_subgraph(&self) -> Option<String> {
        self.network()
            .orgs_subgraph
            .or_else(|| self.environment.default_orgs_subgraph().map(str::to_string))
    }

    /// Multisig subgraph URL for the active network, override first
    pub fn safes_subgraph(&self) -> Option<String> {
        self.network()
            .safes_subgraph
            .or_else(|| self.environment.default_safes_subgraph().map(str::to_string))
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}
