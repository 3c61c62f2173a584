//! Read-only interfaces of the history store.
//!
//! - [`History`]: chain of blocks by height and by id
//! - [`FeatureProvider`]: feature-activation state derived from block votes
//!
//! strata-history's `BlockLedger` implements both. Consumers such as
//! consensus or an API layer should depend on these traits rather than on
//! the concrete ledger.

use std::collections::BTreeMap;

use crate::codec::VoteTally;
use crate::error::StrataError;
use crate::features::{ActivationSettings, FeatureStatus};
use crate::types::{Block, BlockId, FeatureId, Height, Score};

/// Read-only view of the canonical chain.
pub trait History: Send + Sync {
    /// Number of stored blocks; 0 for the empty chain.
    fn height(&self) -> Result<Height, StrataError>;

    /// Cumulative score of the head block (0 when empty).
    fn score(&self) -> Result<Score, StrataError>;

    /// Cumulative score at the block with the given id.
    fn score_of(&self, id: &BlockId) -> Result<Option<Score>, StrataError>;

    /// Height of the block with the given id, if it is on the chain.
    fn height_of(&self, id: &BlockId) -> Result<Option<Height>, StrataError>;

    /// Raw stored bytes of the block at `height`.
    fn block_bytes(&self, height: Height) -> Result<Option<Vec<u8>>, StrataError>;

    /// Decoded block at `height`.
    fn block_at(&self, height: Height) -> Result<Option<Block>, StrataError> {
        match self.block_bytes(height)? {
            Some(bytes) => Ok(Some(Block::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Ids of the `count` most recent blocks, newest first.
    fn last_block_ids(&self, count: usize) -> Result<Vec<BlockId>, StrataError>;

    /// Id of the head block.
    fn last_block_id(&self) -> Result<Option<BlockId>, StrataError> {
        Ok(self.last_block_ids(1)?.into_iter().next())
    }

    /// Decoded head block.
    fn last_block(&self) -> Result<Option<Block>, StrataError>;

    /// Timestamp of the head block in milliseconds.
    fn last_block_timestamp(&self) -> Result<Option<u64>, StrataError> {
        Ok(self.last_block()?.map(|b| b.timestamp()))
    }

    /// Whether a block with this id is on the chain.
    fn contains(&self, id: &BlockId) -> Result<bool, StrataError> {
        Ok(self.height_of(id)?.is_some())
    }
}

/// Read-only view of feature activation.
pub trait FeatureProvider: Send + Sync {
    /// Window size and quorum this provider was built with.
    fn activation_settings(&self) -> ActivationSettings;

    /// Every accepted feature with its acceptance height.
    fn accepted_features(&self) -> Result<BTreeMap<FeatureId, Height>, StrataError>;

    /// Tally of the voting window containing `height`.
    fn feature_votes_within_window(&self, height: Height) -> Result<VoteTally, StrataError>;

    /// Status of `feature` as seen at `height`.
    fn feature_status(&self, feature: FeatureId, height: Height) -> Result<FeatureStatus, StrataError> {
        let accepted_at = self.accepted_features()?.get(&feature).copied();
        Ok(self.activation_settings().status(accepted_at, height))
    }

    /// Height at which `feature` activates, if it has been accepted.
    fn feature_activation_height(&self, feature: FeatureId) -> Result<Option<Height>, StrataError> {
        let settings = self.activation_settings();
        Ok(self
            .accepted_features()?
            .get(&feature)
            .map(|h| settings.activation_height(*h)))
    }

    fn is_feature_activated(&self, feature: FeatureId, height: Height) -> Result<bool, StrataError> {
        Ok(self.feature_status(feature, height)? == FeatureStatus::Activated)
    }
}
