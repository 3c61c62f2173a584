//! Error types for the Strata history store.
use thiserror::Error;

use crate::types::{BlockId, FeatureId, Height, Transaction};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("parent {actual} does not match last block {expected}")] Mismatch { expected: BlockId, actual: BlockId },
    #[error("duplicate block: {0}")] DuplicateBlock(BlockId),
    #[error("block {0} fails its own signature check")] InvalidSignature(BlockId),
    #[error("empty chain: no blocks to discard")] EmptyChain,
    #[error("block not found: {0}")] BlockNotFound(BlockId),
    #[error("height {requested} above tip {tip}")] HeightAboveTip { requested: u64, tip: u64 },
    #[error("inconsistent indices: {0}")] Inconsistent(String),
    #[error("schema version mismatch: found {found}, expected {expected}")] SchemaMismatch { found: u32, expected: u32 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeatureError {
    #[error("unimplemented features {features:?} activated at height {height}")] UnsupportedActivated { height: u64, features: Vec<FeatureId> },
    #[error("height {0} is not an activation window boundary")] NotWindowBoundary(u64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("backend: {0}")] Backend(String),
    #[error("codec: {0}")] Codec(String),
    #[error("missing column family: {0}")] MissingColumn(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("signature verification failed")] VerificationFailed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("activation window size must be positive")] ZeroWindow,
    #[error("min votes {min_votes} must be in 1..={window_size}")] InvalidQuorum { min_votes: u64, window_size: u64 },
    #[error("compaction interval must be positive")] ZeroCompactionInterval,
    #[error("load: {0}")] Load(String),
}

#[derive(Error, Debug)]
pub enum StrataError {
    #[error(transparent)] Chain(#[from] ChainError),
    #[error(transparent)] Feature(#[from] FeatureError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Config(#[from] ConfigError),
    #[error("validation: {0}")] Validation(String),
    #[error("rollback stopped at height {reached}: {source}")] RollbackInterrupted {
        reached: Height,
        /// Transactions of the blocks already discarded, oldest block first.
        transactions: Vec<Transaction>,
        source: Box<StrataError>,
    },
}

impl StrataError {
    /// Whether the embedding process must stop rather than keep serving.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Feature(FeatureError::UnsupportedActivated { .. }) => true,
            Self::RollbackInterrupted { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}
