//! Core history types: block identifiers, blocks, transactions, scores.
//!
//! Heights are 1-based; height 0 denotes the empty chain. Block bytes are
//! produced by bincode and stored verbatim by the ledger.

use std::collections::BTreeSet;
use std::fmt;

use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::StoreError;

/// Position of a block in the canonical chain (1-based).
pub type Height = u64;

/// Identifier of a protocol feature subject to activation voting.
pub type FeatureId = u16;

/// Cumulative chain weight used for fork choice.
pub type Score = BigUint;

/// A 32-byte hash value.
///
/// Used for transaction IDs and generation signatures (BLAKE3).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Unique identifier of a block: its 64-byte Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, bincode::Encode, bincode::Decode)]
pub struct BlockId(pub [u8; 64]);

impl BlockId {
    /// Length of an identifier in bytes.
    pub const LEN: usize = 64;

    /// Parse an identifier from a byte slice of exactly [`Self::LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 64] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Parse a base58 rendering as produced by `Display`.
    pub fn from_base58(s: &str) -> Option<Self> {
        let bytes = bs58::decode(s).into_vec().ok()?;
        Self::from_slice(&bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({self})")
    }
}

impl AsRef<[u8]> for BlockId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for BlockId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// An opaque transaction carried by a block.
///
/// The history store never interprets the payload; discarded blocks hand
/// their transactions back to the caller for resubmission.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Encoded transaction body.
    pub payload: Vec<u8>,
}

impl Transaction {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// BLAKE3 hash of the payload.
    pub fn id(&self) -> Hash256 {
        Hash256(blake3::hash(&self.payload).into())
    }
}

/// Signed part of a block besides its transactions.
#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct BlockHeader {
    /// Block format version.
    pub version: u8,
    /// Identifier of the parent block.
    pub reference: BlockId,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    /// Consensus base target; lower targets weigh more.
    pub base_target: u64,
    /// Generation signature from the consensus layer.
    pub generation_signature: Hash256,
    /// Features the block's generator votes for.
    pub supported_features: BTreeSet<FeatureId>,
    /// Ed25519 public key of the generator.
    pub generator: [u8; 32],
}

impl BlockHeader {
    /// Individual score contribution: `2^64 / base_target`.
    ///
    /// A zero base target contributes nothing.
    pub fn block_score(&self) -> Score {
        if self.base_target == 0 {
            return Score::zero();
        }
        BigUint::from(1u128 << 64) / self.base_target
    }
}

/// A complete block: header, transactions and generator signature.
#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    /// Signature over [`Block::signing_bytes`]; doubles as the block id.
    pub signature: BlockId,
}

impl Block {
    /// The block's unique identifier.
    pub fn id(&self) -> BlockId {
        self.signature
    }

    /// Identifier of the parent block.
    pub fn reference(&self) -> BlockId {
        self.header.reference
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    pub fn supported_features(&self) -> &BTreeSet<FeatureId> {
        &self.header.supported_features
    }

    pub fn block_score(&self) -> Score {
        self.header.block_score()
    }

    /// Bytes covered by the generator signature.
    pub fn signing_bytes(
        header: &BlockHeader,
        transactions: &[Transaction],
    ) -> Result<Vec<u8>, StoreError> {
        bincode::encode_to_vec((header, transactions), bincode::config::standard())
            .map_err(|e| StoreError::Codec(e.to_string()))
    }

    /// Whether the generator signature verifies against the block contents.
    pub fn signature_valid(&self) -> bool {
        crate::crypto::verify_block(self).is_ok()
    }

    /// Encode the block for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Codec(e.to_string()))
    }

    /// Decode a block previously produced by [`Block::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        let (block, _): (Block, _) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| StoreError::Codec(e.to_string()))?;
        Ok(block)
    }
}
