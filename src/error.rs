//! Error types for org-anchors

use crate::backend::BackendError;
use crate::codec::DecodeError;
use crate::contract::ChainError;
use crate::subgraph::SubgraphError;
use thiserror::Error;

/// Result type for org-anchors operations
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error
#[derive(Debug, Error)]
pub enum Error {
    /// Indexer query failed or is unavailable on this network
    #[error(transparent)]
    Subgraph(#[from] SubgraphError),

    /// Local proxy lookup failed
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Contract read or ABI decoding failed
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Identifier decoding failed
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Transient indexer outage (HTTP 502/503); callers may retry
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Subgraph(err) if err.is_unavailable())
    }

    /// The local proxy does not know the requested entity
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Backend(BackendError::NotFound(_)))
    }
}
