//! Deterministic block fixtures for tests.
//!
//! Enabled with the `testing` feature. Blocks are signed with a key derived
//! from a seed byte and carry one unique transaction each, so every block a
//! factory produces has a distinct id.

use crate::crypto::{sign_block, KeyPair};
use crate::types::{Block, BlockHeader, BlockId, FeatureId, Hash256, Transaction};

/// Base target used when none is given; scores each block at `2^64 / 60`.
pub const DEFAULT_BASE_TARGET: u64 = 60;

/// Produces signed, linkable blocks.
pub struct BlockFactory {
    keypair: KeyPair,
    seed: u8,
    counter: u64,
    base_target: u64,
}

impl BlockFactory {
    pub fn new(seed: u8) -> Self {
        Self {
            keypair: KeyPair::from_secret_bytes([seed; 32]),
            seed,
            counter: 0,
            base_target: DEFAULT_BASE_TARGET,
        }
    }

    pub fn with_base_target(mut self, base_target: u64) -> Self {
        self.base_target = base_target;
        self
    }

    /// A block extending `parent` (or the empty chain when `None`).
    pub fn block(&mut self, parent: Option<BlockId>, features: &[FeatureId]) -> Block {
        let base_target = self.base_target;
        self.block_with_target(parent, features, base_target)
    }

    /// Like [`block`](Self::block) with an explicit base target.
    pub fn block_with_target(
        &mut self,
        parent: Option<BlockId>,
        features: &[FeatureId],
        base_target: u64,
    ) -> Block {
        self.counter += 1;
        let header = BlockHeader {
            version: 3,
            reference: parent.unwrap_or(BlockId([0; 64])),
            timestamp: 1_700_000_000_000 + self.counter * 60_000,
            base_target,
            generation_signature: Hash256([self.seed; 32]),
            supported_features: features.iter().copied().collect(),
            generator: [0; 32],
        };
        let mut payload = vec![self.seed];
        payload.extend_from_slice(&self.counter.to_le_bytes());
        sign_block(header, vec![Transaction::new(payload)], &self.keypair)
            .expect("fixture block encodes")
    }

    /// A block extending `parent`.
    pub fn child_of(&mut self, parent: &Block, features: &[FeatureId]) -> Block {
        self.block(Some(parent.id()), features)
    }

    /// `count` linked blocks starting from the empty chain; `features(h)`
    /// gives the votes of the block that will sit at height `h`.
    pub fn chain(&mut self, count: u64, features: impl Fn(u64) -> Vec<FeatureId>) -> Vec<Block> {
        let mut blocks: Vec<Block> = Vec::with_capacity(count as usize);
        for h in 1..=count {
            let parent = blocks.last().map(Block::id);
            blocks.push(self.block(parent, &features(h)));
        }
        blocks
    }
}
