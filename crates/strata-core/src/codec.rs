//! Key and value encodings of the history columns.
//!
//! Heights are big-endian so that column iteration follows chain order.

use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::types::{BlockId, FeatureId, Height, Score};

/// Vote counts of one activation window.
pub type VoteTally = BTreeMap<FeatureId, i64>;

/// Metadata key holding the current tip height (u64 LE).
pub const META_TIP_HEIGHT: &[u8] = b"tip_height";
/// Metadata key holding the on-disk schema version (u32 LE).
pub const META_SCHEMA_VERSION: &[u8] = b"schema_version";

/// Encode a height as big-endian bytes for ordered iteration.
pub fn height_key(height: Height) -> [u8; 8] {
    height.to_be_bytes()
}

pub fn decode_height(bytes: &[u8]) -> Result<Height, StoreError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Codec(format!("invalid height length {}", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}

pub fn decode_block_id(bytes: &[u8]) -> Result<BlockId, StoreError> {
    BlockId::from_slice(bytes)
        .ok_or_else(|| StoreError::Codec(format!("invalid block id length {}", bytes.len())))
}

pub fn feature_key(feature: FeatureId) -> [u8; 2] {
    feature.to_be_bytes()
}

pub fn decode_feature(bytes: &[u8]) -> Result<FeatureId, StoreError> {
    let arr: [u8; 2] = bytes
        .try_into()
        .map_err(|_| StoreError::Codec(format!("invalid feature id length {}", bytes.len())))?;
    Ok(u16::from_be_bytes(arr))
}

pub fn encode_score(score: &Score) -> Vec<u8> {
    score.to_bytes_be()
}

pub fn decode_score(bytes: &[u8]) -> Score {
    Score::from_bytes_be(bytes)
}

pub fn encode_votes(tally: &VoteTally) -> Result<Vec<u8>, StoreError> {
    bincode::encode_to_vec(tally, bincode::config::standard())
        .map_err(|e| StoreError::Codec(e.to_string()))
}

pub fn decode_votes(bytes: &[u8]) -> Result<VoteTally, StoreError> {
    let (tally, _): (VoteTally, _) =
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Codec(e.to_string()))?;
    Ok(tally)
}

pub fn encode_u64_meta(value: u64) -> [u8; 8] {
    value.to_le_bytes()
}

pub fn decode_u64_meta(bytes: &[u8]) -> Result<u64, StoreError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Codec("invalid metadata value length".into()))?;
    Ok(u64::from_le_bytes(arr))
}

pub fn decode_u32_meta(bytes: &[u8]) -> Result<u32, StoreError> {
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| StoreError::Codec("invalid metadata value length".into()))?;
    Ok(u32::from_le_bytes(arr))
}
