//! Binary identifier codec
//!
//! On-chain object ids are 32-byte words: 12 bytes of left padding followed by the
//! 20-byte SHA1 digest that identifies a project. Commit hashes travel as
//! length-prefixed multihashes. Every hex string this module produces is lowercase
//! without a `0x` prefix, so decoded identifiers compare with plain string equality.

use cid::multibase::{self, Base};
use cid::multihash::Multihash;
use multihash_codetable::{Code, MultihashDigest};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Width of an on-chain `bytes32` word
pub const WORD_LEN: usize = 32;

/// Width of a SHA1 digest (project ids, commit hashes, addresses)
pub const SHA1_LEN: usize = 20;

/// Leading padding stripped from on-chain object ids.
///
/// Tied to the `bytes32` encoding width: if the contract changes its word size this
/// offset is wrong.
pub const OBJECT_ID_PADDING: usize = WORD_LEN - SHA1_LEN;

/// Multihash code for SHA1
pub const SHA1_CODE: u64 = 0x11;

/// Largest digest we accept inside a multihash
const MAX_DIGEST_LEN: usize = 64;

const URN_PREFIX: &str = "rad:git:";

/// Identifier decoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Length prefix does not match the buffer, or the varints are broken
    #[error("Malformed multihash: {0}")]
    MalformedMultihash(String),

    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Invalid URN: {0}")]
    InvalidUrn(String),

    #[error("Unsupported hash code 0x{0:x}")]
    UnsupportedHash(u64),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Lowercase hex of `bytes`, no `0x` prefix.
pub fn hex_of_digest(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Parse hex with or without a `0x` prefix, in either case.
pub fn bytes_from_hex(input: &str) -> Result<Vec<u8>, DecodeError> {
    let digits = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);
    hex::decode(digits).map_err(|e| DecodeError::InvalidHex(format!("{}: {}", input, e)))
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], DecodeError> {
    bytes.try_into().map_err(|_| DecodeError::InvalidLength {
        expected: N,
        actual: bytes.len(),
    })
}

/// A decoded multihash: hash function code plus raw digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMultihash {
    pub code: u64,
    pub digest: Vec<u8>,
}

/// Decode a length-prefixed multihash.
///
/// Fails with [`DecodeError::MalformedMultihash`] when the declared digest length does
/// not match the number of bytes that follow it.
pub fn decode_multihash(raw: &[u8]) -> Result<DecodedMultihash, DecodeError> {
    let mh = Multihash::<MAX_DIGEST_LEN>::from_bytes(raw)
        .map_err(|e| DecodeError::MalformedMultihash(e.to_string()))?;
    Ok(DecodedMultihash {
        code: mh.code(),
        digest: mh.digest().to_vec(),
    })
}

/// Decode a padded on-chain object id into a project URN.
pub fn decode_project_urn(raw: &[u8]) -> Result<ProjectUrn, DecodeError> {
    let word: [u8; WORD_LEN] = fixed(raw)?;
    ProjectUrn::from_digest(&word[OBJECT_ID_PADDING..])
}

/// Left-pad `bytes` with zeroes to a `bytes32` word.
pub fn zero_pad(bytes: &[u8]) -> Result<[u8; WORD_LEN], DecodeError> {
    if bytes.len() > WORD_LEN {
        return Err(DecodeError::InvalidLength {
            expected: WORD_LEN,
            actual: bytes.len(),
        });
    }
    let mut word = [0u8; WORD_LEN];
    word[WORD_LEN - bytes.len()..].copy_from_slice(bytes);
    Ok(word)
}

// ==================== ProjectUrn ====================

/// Content-derived project (or identity) identifier.
///
/// Holds the SHA1 digest; the textual form is `rad:git:` followed by the multibase
/// base32z encoding of the SHA1 multihash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectUrn([u8; SHA1_LEN]);

impl ProjectUrn {
    pub fn from_digest(digest: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self(fixed(digest)?))
    }

    /// Derive the URN of a project from its serialized metadata
    pub fn from_metadata(metadata: &[u8]) -> Self {
        let mh = Code::Sha1.digest(metadata);
        let mut digest = [0u8; SHA1_LEN];
        digest.copy_from_slice(mh.digest());
        Self(digest)
    }

    pub fn digest(&self) -> &[u8; SHA1_LEN] {
        &self.0
    }

    pub fn digest_hex(&self) -> String {
        hex_of_digest(&self.0)
    }

    /// The `bytes32` object id used on chain
    pub fn to_object_id(&self) -> [u8; WORD_LEN] {
        let mut word = [0u8; WORD_LEN];
        word[OBJECT_ID_PADDING..].copy_from_slice(&self.0);
        word
    }

    fn multihash(&self) -> Result<Multihash<MAX_DIGEST_LEN>, DecodeError> {
        Multihash::wrap(SHA1_CODE, &self.0).map_err(|e| DecodeError::MalformedMultihash(e.to_string()))
    }
}

impl fmt::Display for ProjectUrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mh = self.multihash().map_err(|_| fmt::Error)?;
        write!(f, "{}{}", URN_PREFIX, multibase::encode(Base::Base32Z, mh.to_bytes()))
    }
}

impl FromStr for ProjectUrn {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoded = s
            .strip_prefix(URN_PREFIX)
            .ok_or_else(|| DecodeError::InvalidUrn(format!("missing `{}` prefix: {}", URN_PREFIX, s)))?;
        let (base, bytes) =
            multibase::decode(encoded).map_err(|e| DecodeError::InvalidUrn(format!("{}: {}", s, e)))?;
        if base != Base::Base32Z {
            return Err(DecodeError::InvalidUrn(format!("{}: expected base32z, got {:?}", s, base)));
        }
        let mh = decode_multihash(&bytes)?;
        if mh.code != SHA1_CODE {
            return Err(DecodeError::UnsupportedHash(mh.code));
        }
        Self::from_digest(&mh.digest)
    }
}

impl TryFrom<String> for ProjectUrn {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProjectUrn> for String {
    fn from(urn: ProjectUrn) -> Self {
        urn.to_string()
    }
}

// ==================== CommitHash ====================

/// 20-byte commit identifier, rendered as 40 lowercase hex characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitHash([u8; SHA1_LEN]);

impl CommitHash {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self(fixed(bytes)?))
    }

    /// Decode the multihash an anchor stores as its state hash
    pub fn from_multihash(raw: &[u8]) -> Result<Self, DecodeError> {
        let mh = decode_multihash(raw)?;
        Self::from_bytes(&mh.digest)
    }

    pub fn as_bytes(&self) -> &[u8; SHA1_LEN] {
        &self.0
    }

    pub fn to_word(&self) -> [u8; WORD_LEN] {
        let mut word = [0u8; WORD_LEN];
        word[WORD_LEN - SHA1_LEN..].copy_from_slice(&self.0);
        word
    }
}

impl fmt::Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex_of_digest(&self.0))
    }
}

impl FromStr for CommitHash {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(&bytes_from_hex(s)?)
    }
}

impl TryFrom<String> for CommitHash {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CommitHash> for String {
    fn from(hash: CommitHash) -> Self {
        hash.to_string()
    }
}

// ==================== Address ====================

/// Ethereum account or contract address.
///
/// Parsing is case-insensitive; display is always lowercase with a `0x` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; SHA1_LEN]);

impl Address {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self(fixed(bytes)?))
    }

    /// Read an ABI-encoded address out of a 32-byte word
    pub fn from_word(word: &[u8]) -> Result<Self, DecodeError> {
        let word: [u8; WORD_LEN] = fixed(word)?;
        Self::from_bytes(&word[WORD_LEN - SHA1_LEN..])
    }

    pub fn as_bytes(&self) -> &[u8; SHA1_LEN] {
        &self.0
    }

    pub fn to_word(&self) -> [u8; WORD_LEN] {
        let mut word = [0u8; WORD_LEN];
        word[WORD_LEN - SHA1_LEN..].copy_from_slice(&self.0);
        word
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex_of_digest(&self.0))
    }
}

impl FromStr for Address {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bytes_from_hex(s).map_err(|_| DecodeError::InvalidAddress(s.to_string()))?;
        Self::from_bytes(&bytes).map_err(|_| DecodeError::InvalidAddress(s.to_string()))
    }
}

impl TryFrom<String> for Address {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}
