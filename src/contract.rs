//! Org contract read/decode surface
//!
//! The crate never executes contracts. It encodes calldata, decodes return values and
//! logs, and reads chain state through [`ChainReader`], which the embedding wallet
//! provider implements. [`RpcChain`] is a plain JSON-RPC `eth_call` implementation.

use crate::codec::{bytes_from_hex, hex_of_digest, Address, CommitHash, DecodeError, ProjectUrn, WORD_LEN};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};
use tracing::debug;

pub const OWNER_SIGNATURE: &str = "owner()";
pub const ANCHOR_SIGNATURE: &str = "anchor(bytes32,bytes32,uint8,uint8)";
pub const CREATE_ORG_SIGNATURE: &str = "createOrg(address[],uint256)";
pub const ORG_CREATED_EVENT: &str = "OrgCreated(address,address)";
pub const GET_CLAIMED_SIGNATURE: &str = "getClaimed(address)";

/// Anchor state type for git commits
const STATE_TYPE_GIT: u8 = 0;
/// Anchor state hash format for multihash-less SHA1
const STATE_FORMAT_SHA1: u8 = 0;

/// Errors from chain reads and ABI decoding
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error from {endpoint}: {message}")]
    Rpc { endpoint: String, message: String },

    #[error("ABI decode error: {0}")]
    Abi(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Org not found in transaction logs")]
    OrgNotCreated,

    #[error("Not configured: {0}")]
    NotConfigured(String),
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}

/// First four bytes of the keccak hash of a function signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Topic 0 of an event
pub fn event_topic(signature: &str) -> [u8; 32] {
    keccak256(signature.as_bytes())
}

fn uint_word(value: u64) -> [u8; WORD_LEN] {
    let mut word = [0u8; WORD_LEN];
    word[WORD_LEN - 8..].copy_from_slice(&value.to_be_bytes());
    word
}

fn word_at(data: &[u8], offset: usize) -> Result<&[u8], ChainError> {
    offset
        .checked_add(WORD_LEN)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| ChainError::Abi(format!("word at {} out of range ({} bytes)", offset, data.len())))
}

fn word_to_usize(word: &[u8]) -> Result<usize, ChainError> {
    if word[..WORD_LEN - 8].iter().any(|b| *b != 0) {
        return Err(ChainError::Abi("integer does not fit in 64 bits".into()));
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[WORD_LEN - 8..]);
    usize::try_from(u64::from_be_bytes(tail)).map_err(|e| ChainError::Abi(e.to_string()))
}

// ==================== Calldata ====================

pub fn encode_owner_call() -> Vec<u8> {
    selector(OWNER_SIGNATURE).to_vec()
}

/// Calldata anchoring `commit` for `project` on an org contract
pub fn encode_anchor_call(project: &ProjectUrn, commit: &CommitHash) -> Vec<u8> {
    let mut data = selector(ANCHOR_SIGNATURE).to_vec();
    data.extend_from_slice(&project.to_object_id());
    data.extend_from_slice(&commit.to_word());
    data.extend_from_slice(&uint_word(u64::from(STATE_TYPE_GIT)));
    data.extend_from_slice(&uint_word(u64::from(STATE_FORMAT_SHA1)));
    data
}

/// Calldata for the org factory's `createOrg(address[],uint256)`
pub fn encode_create_org_call(owners: &[Address], threshold: u64) -> Vec<u8> {
    let mut data = selector(CREATE_ORG_SIGNATURE).to_vec();
    // Head: offset of the dynamic array, then the static threshold
    data.extend_from_slice(&uint_word(2 * WORD_LEN as u64));
    data.extend_from_slice(&uint_word(threshold));
    data.extend_from_slice(&uint_word(owners.len() as u64));
    for owner in owners {
        data.extend_from_slice(&owner.to_word());
    }
    data
}

pub fn encode_get_claimed_call(address: &Address) -> Vec<u8> {
    let mut data = selector(GET_CLAIMED_SIGNATURE).to_vec();
    data.extend_from_slice(&address.to_word());
    data
}

// ==================== Return values ====================

pub fn decode_owner_return(data: &[u8]) -> Result<Address, ChainError> {
    Ok(Address::from_word(word_at(data, 0)?)?)
}

/// Decode a single dynamic `bytes` return value. Empty bytes mean "no claim".
pub fn decode_bytes_return(data: &[u8]) -> Result<Option<Vec<u8>>, ChainError> {
    if data.is_empty() {
        return Ok(None);
    }
    let offset = word_to_usize(word_at(data, 0)?)?;
    let len = word_to_usize(word_at(data, offset)?)?;
    let bytes = offset
        .checked_add(WORD_LEN)
        .and_then(|start| Some(start..start.checked_add(len)?))
        .and_then(|range| data.get(range))
        .ok_or_else(|| ChainError::Abi(format!("bytes of length {} out of range", len)))?;
    if bytes.is_empty() {
        Ok(None)
    } else {
        Ok(Some(bytes.to_vec()))
    }
}

// ==================== Logs ====================

/// A transaction receipt log as returned by JSON-RPC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
}

/// Parse an `OrgCreated(address,address)` log, returning the new org address.
pub fn parse_org_created(log: &Log) -> Result<Address, ChainError> {
    let topic = log
        .topics
        .first()
        .ok_or_else(|| ChainError::Abi("log has no topics".into()))?;
    if bytes_from_hex(topic)? != event_topic(ORG_CREATED_EVENT) {
        return Err(ChainError::Abi(format!("not an {} log", ORG_CREATED_EVENT)));
    }
    let data = bytes_from_hex(&log.data)?;
    word_at(&data, WORD_LEN)?;
    Ok(Address::from_word(word_at(&data, 0)?)?)
}

/// Find the org created by a factory transaction. Logs that do not parse are skipped;
/// when several match, the last one wins.
pub fn find_created_org(logs: &[Log]) -> Result<Address, ChainError> {
    logs.iter()
        .filter_map(|log| match parse_org_created(log) {
            Ok(address) => Some(address),
            Err(e) => {
                debug!(address = %log.address, error = %e, "Skipping log");
                None
            }
        })
        .last()
        .ok_or(ChainError::OrgNotCreated)
}

// ==================== Chain reads ====================

/// Read access to org and claims contracts
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Owner (usually a multisig wallet) of an org contract
    async fn org_owner(&self, org: &Address) -> Result<Address, ChainError>;

    /// Raw identity root claimed by `address` in the claims registry, if any
    async fn get_claimed(&self, address: &Address) -> Result<Option<Vec<u8>>, ChainError>;
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: (CallParams, &'a str),
}

#[derive(Serialize)]
struct CallParams {
    to: String,
    data: String,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// [`ChainReader`] over an Ethereum JSON-RPC endpoint
pub struct RpcChain {
    rpc_url: String,
    claims_address: Option<Address>,
    client: Client,
}

impl RpcChain {
    pub fn new(
        rpc_url: impl Into<String>,
        claims_address: Option<Address>,
        timeout: Duration,
    ) -> Result<Self, ChainError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            rpc_url: rpc_url.into(),
            claims_address,
            client,
        })
    }

    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, ChainError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "eth_call",
            params: (
                CallParams {
                    to: to.to_string(),
                    data: format!("0x{}", hex_of_digest(data)),
                },
                "latest",
            ),
        };

        debug!(to = %to, url = %self.rpc_url, "eth_call");
        let response: RpcResponse = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(ChainError::Rpc {
                endpoint: self.rpc_url.clone(),
                message: format!("{} (code {})", err.message, err.code),
            });
        }
        let result = response.result.ok_or_else(|| ChainError::Rpc {
            endpoint: self.rpc_url.clone(),
            message: "response has neither result nor error".into(),
        })?;
        Ok(bytes_from_hex(&result)?)
    }
}

#[async_trait]
impl ChainReader for RpcChain {
    async fn org_owner(&self, org: &Address) -> Result<Address, ChainError> {
        let data = self.call(org, &encode_owner_call()).await?;
        decode_owner_return(&data)
    }

    async fn get_claimed(&self, address: &Address) -> Result<Option<Vec<u8>>, ChainError> {
        let claims = self
            .claims_address
            .ok_or_else(|| ChainError::NotConfigured("claims contract address".into()))?;
        let data = self.call(&claims, &encode_get_claimed_call(address)).await?;
        decode_bytes_return(&data)
    }
}
