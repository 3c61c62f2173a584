//! The block ledger: coordinated history indices behind one read/write gate.
//!
//! Four indices describe the chain (body, id and score by height, height by
//! id) alongside the persisted tip height. Every append or discard stages
//! its writes, including the feature tracker's, in a [`Staging`] overlay and
//! commits them as one unit while holding the write lock, so readers only
//! ever see whole blocks.

use std::collections::BTreeMap;
use std::path::Path;

use num_traits::Zero;
use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, info, trace, warn};

use strata_core::codec::{self, VoteTally, META_SCHEMA_VERSION, META_TIP_HEIGHT};
use strata_core::constants::{NetworkType, DEFAULT_COMPACTION_INTERVAL, MAX_BLOCK_IDS_PER_REQUEST, SCHEMA_VERSION};
use strata_core::error::{ChainError, ConfigError, StoreError, StrataError};
use strata_core::features::{ActivationSettings, FeatureSettings};
use strata_core::index::{ChangeSet, Column, IndexRead, IndexedStore, Staging};
use strata_core::traits::{FeatureProvider, History};
use strata_core::types::{Block, BlockId, FeatureId, Height, Score, Transaction};

use crate::activation::FeatureActivationTracker;
use crate::storage::RocksStore;

/// Construction-time settings of a [`BlockLedger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSettings {
    pub activation: ActivationSettings,
    pub features: FeatureSettings,
    /// Request compaction every this many heights.
    pub compaction_interval: u64,
}

impl LedgerSettings {
    /// Network defaults with every registered feature implemented.
    pub fn for_network(network: NetworkType) -> Self {
        Self {
            activation: ActivationSettings::for_network(network),
            features: FeatureSettings::default(),
            compaction_interval: DEFAULT_COMPACTION_INTERVAL,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compaction_interval == 0 {
            return Err(ConfigError::ZeroCompactionInterval);
        }
        ActivationSettings::new(self.activation.window_size(), self.activation.min_votes())?;
        Ok(())
    }
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self::for_network(NetworkType::default())
    }
}

/// Consistent snapshot of the chain head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTip {
    pub height: Height,
    /// `None` for the empty chain.
    pub id: Option<BlockId>,
    pub score: Score,
}

/// Operator-facing summary of the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerStats {
    pub height: Height,
    pub score: Score,
    pub last_block_id: Option<BlockId>,
    pub accepted_features: BTreeMap<FeatureId, Height>,
}

/// Result of [`BlockLedger::verify_deep`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub height: Height,
    pub blocks_checked: u64,
    pub problems: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Append-only block history with feature-activation tracking.
///
/// Share it as `Arc<BlockLedger<_>>`: reads run concurrently, appends,
/// discards, rollbacks and compaction run exclusively.
pub struct BlockLedger<S: IndexedStore> {
    store: RwLock<S>,
    tracker: FeatureActivationTracker,
    compaction_interval: u64,
}

impl BlockLedger<RocksStore> {
    /// Open (or create) a RocksDB-backed ledger at `path`.
    pub fn open_path(path: impl AsRef<Path>, settings: LedgerSettings) -> Result<Self, StrataError> {
        let store = RocksStore::open(path)?;
        Self::open(store, settings)
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), StrataError> {
        Ok(self.store.read().flush()?)
    }
}

impl<S: IndexedStore> BlockLedger<S> {
    /// Wrap `store`, stamping a fresh store with the schema version.
    ///
    /// Fails if the settings are invalid, the schema version differs, or the
    /// index cardinalities disagree with the tip height. A damaged store is
    /// never repaired.
    pub fn open(mut store: S, settings: LedgerSettings) -> Result<Self, StrataError> {
        settings.validate()?;

        match store.get(Column::Metadata, META_SCHEMA_VERSION)? {
            Some(bytes) => {
                let found = codec::decode_u32_meta(&bytes)?;
                if found != SCHEMA_VERSION {
                    return Err(ChainError::SchemaMismatch {
                        found,
                        expected: SCHEMA_VERSION,
                    }
                    .into());
                }
            }
            None => {
                let mut changes = ChangeSet::new();
                changes.put(Column::Metadata, META_SCHEMA_VERSION, SCHEMA_VERSION.to_le_bytes());
                store.commit(changes)?;
            }
        }

        check_cardinalities(&store)?;
        let height = tip_height(&store)?;
        info!(
            height,
            window = settings.activation.window_size(),
            min_votes = settings.activation.min_votes(),
            "history opened"
        );

        Ok(Self {
            store: RwLock::new(store),
            tracker: FeatureActivationTracker::new(settings.activation, settings.features),
            compaction_interval: settings.compaction_interval,
        })
    }

    /// Shared access to the underlying store.
    pub fn store(&self) -> RwLockReadGuard<'_, S> {
        self.store.read()
    }

    pub fn tracker(&self) -> &FeatureActivationTracker {
        &self.tracker
    }

    /// Append `block` on top of the current head.
    ///
    /// `validate` runs under the write lock after linkage checks and before
    /// any mutation; its error is returned unchanged and nothing is written.
    /// It must not call back into the ledger. On success its output is
    /// returned.
    pub fn append_block<D>(
        &self,
        block: &Block,
        validate: impl FnOnce() -> Result<D, StrataError>,
    ) -> Result<D, StrataError> {
        let id = block.id();
        if !block.signature_valid() {
            return Err(ChainError::InvalidSignature(id).into());
        }

        let mut store = self.store.write();
        let height = tip_height(&*store)?;
        if height > 0 {
            let head = id_at(&*store, height)?
                .ok_or_else(|| missing("signature", height))?;
            if block.reference() != head {
                return Err(ChainError::Mismatch {
                    expected: head,
                    actual: block.reference(),
                }
                .into());
            }
        }
        if height_of_id(&*store, &id)?.is_some() {
            return Err(ChainError::DuplicateBlock(id).into());
        }

        let output = validate()?;

        let bytes = block.to_bytes()?;
        let size = bytes.len();
        let h = height + 1;
        let score = score_at(&*store, height)? + block.block_score();

        let mut staging = Staging::new(&*store);
        let key = codec::height_key(h);
        staging.put(Column::Blocks, key, bytes);
        staging.put(Column::Signatures, key, id.0);
        staging.put(Column::SignaturesReverse, id.0, key);
        staging.put(Column::Score, key, codec::encode_score(&score));
        staging.put(Column::Metadata, META_TIP_HEIGHT, codec::encode_u64_meta(h));

        let opening = self.tracker.window_opening(h);
        self.tracker
            .record_votes(&mut staging, opening, block.supported_features(), 1)?;
        if self.tracker.activation_settings().is_window_boundary(h) {
            self.tracker.update_state(&mut staging, h)?;
        }

        let changes = staging.into_changes();
        store.commit(changes)?;
        debug!(height = h, size, transactions = block.transactions.len(), "block appended");
        trace!(height = h, id = %id, "block persisted");

        if h % self.compaction_interval == 0 {
            match store.compact() {
                Ok(()) => info!(height = h, "history compacted"),
                Err(e) => warn!(height = h, error = %e, "compaction failed"),
            }
        }
        Ok(output)
    }

    /// Remove the head block and return its transactions.
    pub fn discard_block(&self) -> Result<Vec<Transaction>, StrataError> {
        let mut store = self.store.write();
        self.discard_top(&mut store)
    }

    /// Discard blocks until the chain is `height` long.
    ///
    /// Transactions are returned oldest block first. Each discarded block is
    /// committed on its own, all under one write acquisition, so the rollback
    /// is not atomic across blocks: if a discard fails, the blocks already
    /// removed stay removed and the error carries how far it got.
    pub fn rollback_to(&self, height: Height) -> Result<Vec<Transaction>, StrataError> {
        let mut store = self.store.write();
        self.rollback_locked(&mut store, height)
    }

    /// Discard every block above the block with `id`.
    pub fn rollback_to_block(&self, id: &BlockId) -> Result<Vec<Transaction>, StrataError> {
        let mut store = self.store.write();
        let height = height_of_id(&*store, id)?.ok_or(ChainError::BlockNotFound(*id))?;
        self.rollback_locked(&mut store, height)
    }

    /// Manually compact the underlying store.
    pub fn compact(&self) -> Result<(), StrataError> {
        let store = self.store.write();
        store.compact()?;
        info!(height = tip_height(&*store)?, "history compacted");
        Ok(())
    }

    /// Consistent snapshot of height, head id and score.
    pub fn tip(&self) -> Result<ChainTip, StrataError> {
        let store = self.store.read();
        let height = tip_height(&*store)?;
        Ok(ChainTip {
            height,
            id: id_at(&*store, height)?,
            score: score_at(&*store, height)?,
        })
    }

    pub fn stats(&self) -> Result<LedgerStats, StrataError> {
        let store = self.store.read();
        let height = tip_height(&*store)?;
        Ok(LedgerStats {
            height,
            score: score_at(&*store, height)?,
            last_block_id: id_at(&*store, height)?,
            accepted_features: self.tracker.accepted_features(&*store)?,
        })
    }

    pub fn block_by_id(&self, id: &BlockId) -> Result<Option<Block>, StrataError> {
        let store = self.store.read();
        match height_of_id(&*store, id)? {
            Some(h) => block_at(&*store, h),
            None => Ok(None),
        }
    }

    /// Up to `count` ids following `parent`, oldest first; `None` if `parent`
    /// is not on the chain. `count` is capped at [`MAX_BLOCK_IDS_PER_REQUEST`].
    pub fn block_ids_after(
        &self,
        parent: &BlockId,
        count: usize,
    ) -> Result<Option<Vec<BlockId>>, StrataError> {
        let store = self.store.read();
        let Some(from) = height_of_id(&*store, parent)? else {
            return Ok(None);
        };
        let tip = tip_height(&*store)?;
        let count = count.min(MAX_BLOCK_IDS_PER_REQUEST) as u64;
        let to = tip.min(from.saturating_add(count));

        let mut ids = Vec::with_capacity((to - from) as usize);
        for h in (from + 1)..=to {
            ids.push(id_at(&*store, h)?.ok_or_else(|| missing("signature", h))?);
        }
        Ok(Some(ids))
    }

    /// Ancestor of `block`: `back = 1` is its parent, `back = 2` the
    /// grandparent, and so on. `back = 0` yields `None`.
    pub fn parent(&self, block: &Block, back: u64) -> Result<Option<Block>, StrataError> {
        if back == 0 {
            return Ok(None);
        }
        let store = self.store.read();
        let Some(parent_height) = height_of_id(&*store, &block.reference())? else {
            return Ok(None);
        };
        match (parent_height + 1).checked_sub(back) {
            Some(h) if h >= 1 => block_at(&*store, h),
            _ => Ok(None),
        }
    }

    /// Block stored directly above `block`.
    pub fn child(&self, block: &Block) -> Result<Option<Block>, StrataError> {
        let store = self.store.read();
        match height_of_id(&*store, &block.id())? {
            Some(h) => block_at(&*store, h + 1),
            None => Ok(None),
        }
    }

    /// Check that every core index holds exactly one entry per height.
    pub fn check_consistency(&self) -> Result<(), StrataError> {
        check_cardinalities(&*self.store.read())
    }

    /// Full scan of the indices and feature state.
    pub fn verify_deep(&self) -> Result<ConsistencyReport, StrataError> {
        let store = self.store.read();
        let height = tip_height(&*store)?;
        let mut report = ConsistencyReport {
            height,
            ..ConsistencyReport::default()
        };

        for column in CORE_COLUMNS {
            let n = store.count(column)?;
            if n != height {
                report
                    .problems
                    .push(format!("{} holds {n} entries, tip height is {height}", column.name()));
            }
        }

        let mut previous = Score::zero();
        for h in 1..=height {
            report.blocks_checked += 1;
            let Some(id) = id_at(&*store, h)? else {
                report.problems.push(format!("no block id at height {h}"));
                continue;
            };
            match height_of_id(&*store, &id)? {
                Some(back) if back == h => {}
                Some(back) => report
                    .problems
                    .push(format!("id at height {h} maps back to height {back}")),
                None => report
                    .problems
                    .push(format!("id at height {h} has no reverse entry")),
            }
            match store.get(Column::Blocks, &codec::height_key(h))? {
                Some(bytes) => match Block::from_bytes(&bytes) {
                    Ok(block) if block.id() == id => {}
                    Ok(block) => report.problems.push(format!(
                        "block at height {h} has id {}, index says {id}",
                        block.id()
                    )),
                    Err(e) => report
                        .problems
                        .push(format!("block at height {h} does not decode: {e}")),
                },
                None => report.problems.push(format!("no block body at height {h}")),
            }
            match store.get(Column::Score, &codec::height_key(h))? {
                Some(bytes) => {
                    let score = codec::decode_score(&bytes);
                    if score < previous {
                        report
                            .problems
                            .push(format!("score decreases at height {h}"));
                    }
                    previous = score;
                }
                None => report.problems.push(format!("no score at height {h}")),
            }
        }

        let window = self.tracker.activation_settings().window_size();
        for (feature, accepted_at) in self.tracker.accepted_features(&*store)? {
            if accepted_at % window != 0 {
                report.problems.push(format!(
                    "feature {feature} accepted at {accepted_at}, not a window boundary"
                ));
            }
        }
        for (key, _) in store.scan(Column::FeatureVotes)? {
            let opening = codec::decode_height(&key)?;
            if self.tracker.window_opening(opening) != opening || opening > height {
                report
                    .problems
                    .push(format!("vote tally keyed at {opening} is not an open window"));
            }
        }

        Ok(report)
    }

    fn rollback_locked(&self, store: &mut S, target: Height) -> Result<Vec<Transaction>, StrataError> {
        let from = tip_height(&*store)?;
        if target > from {
            return Err(ChainError::HeightAboveTip {
                requested: target,
                tip: from,
            }
            .into());
        }

        let mut removed = Vec::new();
        for h in ((target + 1)..=from).rev() {
            match self.discard_top(store) {
                Ok(transactions) => removed.push(transactions),
                Err(e) => {
                    warn!(from, reached = h, error = %e, "rollback interrupted");
                    return Err(StrataError::RollbackInterrupted {
                        reached: h,
                        transactions: removed.into_iter().rev().flatten().collect(),
                        source: Box::new(e),
                    });
                }
            }
        }
        if from > target {
            info!(from, to = target, "history rolled back");
        }
        Ok(removed.into_iter().rev().flatten().collect())
    }

    fn discard_top(&self, store: &mut S) -> Result<Vec<Transaction>, StrataError> {
        let h = tip_height(&*store)?;
        if h == 0 {
            return Err(ChainError::EmptyChain.into());
        }
        let key = codec::height_key(h);
        let bytes = store
            .get(Column::Blocks, &key)?
            .ok_or_else(|| missing("block", h))?;
        let id = id_at(&*store, h)?.ok_or_else(|| missing("signature", h))?;

        let mut staging = Staging::new(&*store);
        let transactions = match Block::from_bytes(&bytes) {
            Ok(block) => {
                let opening = self.tracker.window_opening(h);
                self.tracker
                    .record_votes(&mut staging, opening, block.supported_features(), -1)?;
                block.transactions
            }
            Err(e) => {
                warn!(height = h, error = %e, "discarding undecodable block; votes left in place");
                Vec::new()
            }
        };

        staging.delete(Column::Blocks, key);
        staging.delete(Column::Signatures, key);
        staging.delete(Column::SignaturesReverse, id.0);
        staging.delete(Column::Score, key);
        if h > 1 {
            staging.put(Column::Metadata, META_TIP_HEIGHT, codec::encode_u64_meta(h - 1));
        } else {
            staging.delete(Column::Metadata, META_TIP_HEIGHT);
        }
        self.tracker.discard_state(&mut staging, h)?;

        let changes = staging.into_changes();
        store.commit(changes)?;
        debug!(height = h, size = bytes.len(), transactions = transactions.len(), "block discarded");
        trace!(height = h, id = %id, "discard persisted");
        Ok(transactions)
    }
}

impl<S: IndexedStore> History for BlockLedger<S> {
    fn height(&self) -> Result<Height, StrataError> {
        Ok(tip_height(&*self.store.read())?)
    }

    fn score(&self) -> Result<Score, StrataError> {
        let store = self.store.read();
        let height = tip_height(&*store)?;
        score_at(&*store, height)
    }

    fn score_of(&self, id: &BlockId) -> Result<Option<Score>, StrataError> {
        let store = self.store.read();
        match height_of_id(&*store, id)? {
            Some(h) => Ok(Some(score_at(&*store, h)?)),
            None => Ok(None),
        }
    }

    fn height_of(&self, id: &BlockId) -> Result<Option<Height>, StrataError> {
        Ok(height_of_id(&*self.store.read(), id)?)
    }

    fn block_bytes(&self, height: Height) -> Result<Option<Vec<u8>>, StrataError> {
        Ok(self
            .store
            .read()
            .get(Column::Blocks, &codec::height_key(height))?)
    }

    fn last_block_ids(&self, count: usize) -> Result<Vec<BlockId>, StrataError> {
        let store = self.store.read();
        let height = tip_height(&*store)?;
        let mut ids = Vec::with_capacity(count.min(height as usize));
        let mut h = height;
        while h >= 1 && ids.len() < count {
            ids.push(id_at(&*store, h)?.ok_or_else(|| missing("signature", h))?);
            h -= 1;
        }
        Ok(ids)
    }

    fn last_block(&self) -> Result<Option<Block>, StrataError> {
        let store = self.store.read();
        let height = tip_height(&*store)?;
        block_at(&*store, height)
    }
}

impl<S: IndexedStore> FeatureProvider for BlockLedger<S> {
    fn activation_settings(&self) -> ActivationSettings {
        self.tracker.activation_settings()
    }

    fn accepted_features(&self) -> Result<BTreeMap<FeatureId, Height>, StrataError> {
        Ok(self.tracker.accepted_features(&*self.store.read())?)
    }

    fn feature_votes_within_window(&self, height: Height) -> Result<VoteTally, StrataError> {
        Ok(self.tracker.votes_within_window(&*self.store.read(), height)?)
    }
}

// --- Index helpers over any readable view ---

const CORE_COLUMNS: [Column; 4] = [
    Column::Blocks,
    Column::Signatures,
    Column::SignaturesReverse,
    Column::Score,
];

fn missing(what: &str, height: Height) -> ChainError {
    ChainError::Inconsistent(format!("no {what} at height {height}"))
}

fn tip_height<R: IndexRead + ?Sized>(store: &R) -> Result<Height, StoreError> {
    match store.get(Column::Metadata, META_TIP_HEIGHT)? {
        Some(bytes) => codec::decode_u64_meta(&bytes),
        None => Ok(0),
    }
}

fn id_at<R: IndexRead + ?Sized>(store: &R, height: Height) -> Result<Option<BlockId>, StoreError> {
    store
        .get(Column::Signatures, &codec::height_key(height))?
        .map(|v| codec::decode_block_id(&v))
        .transpose()
}

fn height_of_id<R: IndexRead + ?Sized>(store: &R, id: &BlockId) -> Result<Option<Height>, StoreError> {
    store
        .get(Column::SignaturesReverse, id.as_bytes())?
        .map(|v| codec::decode_height(&v))
        .transpose()
}

/// Cumulative score at `height`; zero for the empty chain.
fn score_at<R: IndexRead + ?Sized>(store: &R, height: Height) -> Result<Score, StrataError> {
    if height == 0 {
        return Ok(Score::zero());
    }
    match store.get(Column::Score, &codec::height_key(height))? {
        Some(bytes) => Ok(codec::decode_score(&bytes)),
        None => Err(missing("score", height).into()),
    }
}

fn block_at<R: IndexRead + ?Sized>(store: &R, height: Height) -> Result<Option<Block>, StrataError> {
    match store.get(Column::Blocks, &codec::height_key(height))? {
        Some(bytes) => Ok(Some(Block::from_bytes(&bytes)?)),
        None => Ok(None),
    }
}

fn check_cardinalities<R: IndexRead + ?Sized>(store: &R) -> Result<(), StrataError> {
    let height = tip_height(store)?;
    for column in CORE_COLUMNS {
        let n = store.count(column)?;
        if n != height {
            return Err(ChainError::Inconsistent(format!(
                "{} holds {n} entries, tip height is {height}",
                column.name()
            ))
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;

    use strata_core::error::FeatureError;
    use strata_core::features::FeatureStatus;
    use strata_core::index::MemoryStore;
    use strata_core::testing::BlockFactory;

    fn settings(window: u64, min: u64) -> LedgerSettings {
        LedgerSettings {
            activation: ActivationSettings::new(window, min).unwrap(),
            features: FeatureSettings::default(),
            compaction_interval: DEFAULT_COMPACTION_INTERVAL,
        }
    }

    fn ledger(window: u64, min: u64) -> BlockLedger<MemoryStore> {
        BlockLedger::open(MemoryStore::new(), settings(window, min)).unwrap()
    }

    fn ok() -> Result<(), StrataError> {
        Ok(())
    }

    fn append_all(ledger: &BlockLedger<MemoryStore>, blocks: &[Block]) {
        for block in blocks {
            ledger.append_block(block, ok).unwrap();
        }
    }

    /// Memory store whose compaction always fails and whose commits can be
    /// rationed once the budget is set.
    struct FaultyStore {
        inner: MemoryStore,
        commit_budget: Arc<AtomicU64>,
        fail_compact: bool,
    }

    const UNLIMITED: u64 = u64::MAX;

    impl FaultyStore {
        fn new(fail_compact: bool) -> (Self, Arc<AtomicU64>) {
            let budget = Arc::new(AtomicU64::new(UNLIMITED));
            let store = Self {
                inner: MemoryStore::new(),
                commit_budget: Arc::clone(&budget),
                fail_compact,
            };
            (store, budget)
        }
    }

    impl IndexRead for FaultyStore {
        fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(column, key)
        }

        fn scan(&self, column: Column) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
            self.inner.scan(column)
        }
    }

    impl IndexedStore for FaultyStore {
        fn commit(&mut self, changes: ChangeSet) -> Result<(), StoreError> {
            let left = self.commit_budget.load(Ordering::SeqCst);
            if left == 0 {
                return Err(StoreError::Backend("write refused".into()));
            }
            if left != UNLIMITED {
                self.commit_budget.store(left - 1, Ordering::SeqCst);
            }
            self.inner.commit(changes)
        }

        fn compact(&self) -> Result<(), StoreError> {
            if self.fail_compact {
                return Err(StoreError::Backend("compaction refused".into()));
            }
            self.inner.compact()
        }
    }

    // --- open ---

    #[test]
    fn open_stamps_schema_version() {
        let l = ledger(3, 2);
        let stamped = l.store().get(Column::Metadata, META_SCHEMA_VERSION).unwrap();
        assert_eq!(stamped, Some(SCHEMA_VERSION.to_le_bytes().to_vec()));
        assert_eq!(l.height().unwrap(), 0);
    }

    #[test]
    fn open_rejects_other_schema_version() {
        let mut store = MemoryStore::new();
        store.put_raw(Column::Metadata, META_SCHEMA_VERSION, &99u32.to_le_bytes());
        let err = BlockLedger::open(store, settings(3, 2)).err().unwrap();
        assert!(matches!(
            err,
            StrataError::Chain(ChainError::SchemaMismatch { found: 99, .. })
        ));
    }

    #[test]
    fn open_rejects_mismatched_cardinalities() {
        let mut store = MemoryStore::new();
        store.put_raw(Column::Blocks, &codec::height_key(1), &[0]);
        let err = BlockLedger::open(store, settings(3, 2)).err().unwrap();
        assert!(matches!(err, StrataError::Chain(ChainError::Inconsistent(_))));
    }

    #[test]
    fn open_rejects_zero_compaction_interval() {
        let mut s = settings(3, 2);
        s.compaction_interval = 0;
        let err = BlockLedger::open(MemoryStore::new(), s).err().unwrap();
        assert!(matches!(
            err,
            StrataError::Config(ConfigError::ZeroCompactionInterval)
        ));
    }

    // --- append ---

    #[test]
    fn append_indexes_block_and_score() {
        let l = ledger(3, 2);
        let blocks = BlockFactory::new(1).chain(2, |_| vec![]);
        append_all(&l, &blocks);

        assert_eq!(l.height().unwrap(), 2);
        assert_eq!(l.height_of(&blocks[1].id()).unwrap(), Some(2));
        assert_eq!(l.block_at(1).unwrap(), Some(blocks[0].clone()));
        assert_eq!(l.block_bytes(2).unwrap(), Some(blocks[1].to_bytes().unwrap()));
        let expected = blocks[0].block_score() + blocks[1].block_score();
        assert_eq!(l.score().unwrap(), expected);
        assert_eq!(l.score_of(&blocks[0].id()).unwrap(), Some(blocks[0].block_score()));
        assert_eq!(l.last_block_id().unwrap(), Some(blocks[1].id()));
        assert_eq!(l.last_block_timestamp().unwrap(), Some(blocks[1].timestamp()));
    }

    #[test]
    fn append_returns_validation_output() {
        let l = ledger(3, 2);
        let block = BlockFactory::new(1).block(None, &[]);
        let out = l.append_block(&block, || Ok(42u32)).unwrap();
        assert_eq!(out, 42);
    }

    #[test]
    fn wrong_parent_is_mismatch_without_mutation() {
        let l = ledger(3, 2);
        let mut f = BlockFactory::new(1);
        let first = f.block(None, &[]);
        l.append_block(&first, ok).unwrap();
        let commits = l.store().commit_count();

        let orphan = f.block(Some(BlockId([9; 64])), &[]);
        let err = l.append_block(&orphan, ok).unwrap_err();
        match err {
            StrataError::Chain(ChainError::Mismatch { expected, actual }) => {
                assert_eq!(expected, first.id());
                assert_eq!(actual, BlockId([9; 64]));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(l.height().unwrap(), 1);
        assert_eq!(l.store().commit_count(), commits);
    }

    /// Write `blocks` at heights 1.. directly into the indices.
    fn raw_chain(blocks: &[&Block]) -> MemoryStore {
        let mut store = MemoryStore::new();
        let mut score = Score::zero();
        for (i, block) in blocks.iter().enumerate() {
            let key = codec::height_key(i as u64 + 1);
            score += block.block_score();
            store.put_raw(Column::Blocks, &key, &block.to_bytes().unwrap());
            store.put_raw(Column::Signatures, &key, &block.id().0);
            store.put_raw(Column::SignaturesReverse, &block.id().0, &key);
            store.put_raw(Column::Score, &key, &codec::encode_score(&score));
        }
        store.put_raw(
            Column::Metadata,
            META_TIP_HEIGHT,
            &codec::encode_u64_meta(blocks.len() as u64),
        );
        store
    }

    #[test]
    fn duplicate_block_rejected() {
        let mut f = BlockFactory::new(1);
        let a = f.block(None, &[]);
        let b = f.child_of(&a, &[]);
        // Head is `a` and `b` already sits below it.
        let l = BlockLedger::open(raw_chain(&[&b, &a]), settings(3, 2)).unwrap();
        let commits = l.store().commit_count();

        let err = l.append_block(&b, ok).unwrap_err();
        assert!(matches!(err, StrataError::Chain(ChainError::DuplicateBlock(id)) if id == b.id()));
        assert_eq!(l.height().unwrap(), 2);
        assert_eq!(l.store().commit_count(), commits);
    }

    #[test]
    fn failing_validation_propagates_without_mutation() {
        let l = ledger(3, 2);
        let block = BlockFactory::new(1).block(None, &[7]);
        let err = l
            .append_block(&block, || -> Result<(), StrataError> {
                Err(StrataError::Validation("bad generator".into()))
            })
            .unwrap_err();
        assert!(matches!(err, StrataError::Validation(ref m) if m == "bad generator"));
        assert_eq!(l.height().unwrap(), 0);
        assert!(l.feature_votes_within_window(1).unwrap().is_empty());
    }

    #[test]
    fn tampered_block_fails_signature_check() {
        let l = ledger(3, 2);
        let mut block = BlockFactory::new(1).block(None, &[]);
        block.header.timestamp += 1;
        let err = l.append_block(&block, ok).unwrap_err();
        assert!(matches!(err, StrataError::Chain(ChainError::InvalidSignature(_))));
        assert_eq!(l.store().commit_count(), 1);
    }

    #[test]
    fn compaction_requested_every_interval() {
        let mut s = settings(3, 2);
        s.compaction_interval = 4;
        let l = BlockLedger::open(MemoryStore::new(), s).unwrap();
        append_all(&l, &BlockFactory::new(1).chain(9, |_| vec![]));
        assert_eq!(l.store().compaction_count(), 2);
    }

    #[test]
    fn failed_compaction_keeps_append_successful() {
        let (store, _) = FaultyStore::new(true);
        let mut s = settings(3, 2);
        s.compaction_interval = 2;
        let l = BlockLedger::open(store, s).unwrap();
        let blocks = BlockFactory::new(1).chain(3, |_| vec![]);

        l.append_block(&blocks[0], ok).unwrap();
        l.append_block(&blocks[1], ok).unwrap();
        assert_eq!(l.height().unwrap(), 2);
        assert_eq!(l.last_block_id().unwrap(), Some(blocks[1].id()));

        // The chain keeps growing from the committed head.
        l.append_block(&blocks[2], ok).unwrap();
        assert_eq!(l.height().unwrap(), 3);
    }

    #[test]
    fn compaction_every_hundred_by_default() {
        let l = ledger(3, 2);
        append_all(&l, &BlockFactory::new(1).chain(100, |_| vec![]));
        assert_eq!(l.store().compaction_count(), 1);
    }

    // --- feature activation ---

    #[test]
    fn quorum_accepts_then_activates() {
        let l = ledger(3, 2);
        let blocks = BlockFactory::new(1).chain(6, |h| if h <= 2 { vec![7] } else { vec![] });
        append_all(&l, &blocks[..3]);

        assert_eq!(l.accepted_features().unwrap().get(&7), Some(&3));
        assert_eq!(l.feature_status(7, 3).unwrap(), FeatureStatus::Accepted);
        assert_eq!(l.feature_status(7, 6).unwrap(), FeatureStatus::Activated);
        assert_eq!(l.feature_activation_height(7).unwrap(), Some(6));
        assert!(!l.is_feature_activated(7, 5).unwrap());
        assert!(l.is_feature_activated(7, 6).unwrap());
    }

    #[test]
    fn unsupported_activation_aborts_append() {
        let l = ledger(3, 2);
        let blocks = BlockFactory::new(1).chain(6, |h| if h <= 2 { vec![7] } else { vec![] });
        append_all(&l, &blocks[..5]);
        let before = l.store().dump();

        let err = l.append_block(&blocks[5], ok).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            StrataError::Feature(FeatureError::UnsupportedActivated { height: 6, .. })
        ));
        assert_eq!(l.height().unwrap(), 5);
        assert_eq!(l.store().dump(), before);
    }

    #[test]
    fn unsupported_activation_continues_without_fail_stop() {
        let mut s = settings(3, 2);
        s.features.auto_shutdown_on_unsupported_feature = false;
        let l = BlockLedger::open(MemoryStore::new(), s).unwrap();
        let blocks = BlockFactory::new(1).chain(6, |h| if h <= 2 { vec![7] } else { vec![] });
        append_all(&l, &blocks);
        assert_eq!(l.height().unwrap(), 6);
        assert!(l.is_feature_activated(7, 6).unwrap());
    }

    // --- discard ---

    #[test]
    fn discard_returns_transactions_and_unlinks() {
        let l = ledger(3, 2);
        let blocks = BlockFactory::new(1).chain(5, |_| vec![]);
        append_all(&l, &blocks);

        let txs = l.discard_block().unwrap();
        assert_eq!(txs, blocks[4].transactions);
        assert_eq!(l.height().unwrap(), 4);
        assert_eq!(l.height_of(&blocks[4].id()).unwrap(), None);
        assert_eq!(l.last_block_id().unwrap(), Some(blocks[3].id()));
        l.check_consistency().unwrap();
    }

    #[test]
    fn discard_empty_chain_errors() {
        let l = ledger(3, 2);
        let err = l.discard_block().unwrap_err();
        assert!(matches!(err, StrataError::Chain(ChainError::EmptyChain)));
    }

    #[test]
    fn discarding_boundary_block_reverts_acceptance() {
        let l = ledger(3, 2);
        let blocks = BlockFactory::new(1).chain(3, |_| vec![7]);
        append_all(&l, &blocks);
        assert_eq!(l.feature_status(7, 3).unwrap(), FeatureStatus::Accepted);

        l.discard_block().unwrap();
        assert_eq!(l.feature_status(7, 2).unwrap(), FeatureStatus::Undefined);
        assert_eq!(l.feature_votes_within_window(2).unwrap().get(&7), Some(&2));
    }

    #[test]
    fn append_then_discard_is_identity() {
        let l = ledger(3, 2);
        let blocks = BlockFactory::new(1).chain(4, |h| vec![(h % 2) as u16 + 1]);
        append_all(&l, &blocks[..2]);
        let before = l.store().dump();

        append_all(&l, &blocks[2..]);
        l.discard_block().unwrap();
        l.discard_block().unwrap();
        assert_eq!(l.store().dump(), before);
    }

    #[test]
    fn discard_to_empty_leaves_only_schema() {
        let l = ledger(3, 2);
        let before = l.store().dump();
        append_all(&l, &BlockFactory::new(1).chain(1, |_| vec![5]));
        l.discard_block().unwrap();
        assert_eq!(l.store().dump(), before);
    }

    #[test]
    fn undecodable_block_discards_with_empty_transactions() {
        let mut store = MemoryStore::new();
        let id = BlockId([3; 64]);
        let key = codec::height_key(1);
        store.put_raw(Column::Blocks, &key, &[0xff, 0xff]);
        store.put_raw(Column::Signatures, &key, &id.0);
        store.put_raw(Column::SignaturesReverse, &id.0, &key);
        store.put_raw(Column::Score, &key, &codec::encode_score(&Score::from(1u8)));
        store.put_raw(Column::Metadata, META_TIP_HEIGHT, &codec::encode_u64_meta(1));
        let l = BlockLedger::open(store, settings(3, 2)).unwrap();

        assert!(l.discard_block().unwrap().is_empty());
        assert_eq!(l.height().unwrap(), 0);
    }

    // --- rollback ---

    #[test]
    fn rollback_returns_transactions_oldest_first() {
        let l = ledger(3, 2);
        let blocks = BlockFactory::new(1).chain(5, |_| vec![]);
        append_all(&l, &blocks);

        let txs = l.rollback_to(2).unwrap();
        let expected: Vec<Transaction> = blocks[2..]
            .iter()
            .flat_map(|b| b.transactions.clone())
            .collect();
        assert_eq!(txs, expected);
        assert_eq!(l.height().unwrap(), 2);
    }

    #[test]
    fn rollback_above_tip_rejected() {
        let l = ledger(3, 2);
        append_all(&l, &BlockFactory::new(1).chain(2, |_| vec![]));
        let err = l.rollback_to(3).unwrap_err();
        assert!(matches!(
            err,
            StrataError::Chain(ChainError::HeightAboveTip { requested: 3, tip: 2 })
        ));
        assert!(l.rollback_to(2).unwrap().is_empty());
    }

    #[test]
    fn interrupted_rollback_returns_discarded_transactions() {
        let (store, budget) = FaultyStore::new(false);
        let l = BlockLedger::open(store, settings(3, 2)).unwrap();
        let blocks = BlockFactory::new(1).chain(5, |_| vec![]);
        for block in &blocks {
            l.append_block(block, ok).unwrap();
        }

        budget.store(2, Ordering::SeqCst);
        let err = l.rollback_to(1).unwrap_err();
        match err {
            StrataError::RollbackInterrupted {
                reached,
                transactions,
                source,
            } => {
                assert_eq!(reached, 3);
                let expected: Vec<_> = blocks[3..]
                    .iter()
                    .flat_map(|b| b.transactions.clone())
                    .collect();
                assert_eq!(transactions, expected);
                assert!(matches!(*source, StrataError::Store(StoreError::Backend(_))));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(l.height().unwrap(), 3);
        l.check_consistency().unwrap();
    }

    #[test]
    fn rollback_to_block_by_id() {
        let l = ledger(3, 2);
        let blocks = BlockFactory::new(1).chain(4, |_| vec![]);
        append_all(&l, &blocks);

        l.rollback_to_block(&blocks[1].id()).unwrap();
        assert_eq!(l.last_block_id().unwrap(), Some(blocks[1].id()));

        let err = l.rollback_to_block(&BlockId([8; 64])).unwrap_err();
        assert!(matches!(err, StrataError::Chain(ChainError::BlockNotFound(_))));
    }

    // --- navigation ---

    #[test]
    fn last_block_ids_newest_first() {
        let l = ledger(3, 2);
        let blocks = BlockFactory::new(1).chain(3, |_| vec![]);
        append_all(&l, &blocks);
        assert_eq!(
            l.last_block_ids(2).unwrap(),
            vec![blocks[2].id(), blocks[1].id()]
        );
        assert_eq!(l.last_block_ids(10).unwrap().len(), 3);
    }

    #[test]
    fn block_ids_after_parent() {
        let l = ledger(3, 2);
        let blocks = BlockFactory::new(1).chain(5, |_| vec![]);
        append_all(&l, &blocks);

        let ids = l.block_ids_after(&blocks[1].id(), 2).unwrap().unwrap();
        assert_eq!(ids, vec![blocks[2].id(), blocks[3].id()]);
        let tail = l.block_ids_after(&blocks[3].id(), 100).unwrap().unwrap();
        assert_eq!(tail, vec![blocks[4].id()]);
        assert_eq!(l.block_ids_after(&BlockId([1; 64]), 5).unwrap(), None);
    }

    #[test]
    fn parent_and_child_navigation() {
        let l = ledger(3, 2);
        let blocks = BlockFactory::new(1).chain(4, |_| vec![]);
        append_all(&l, &blocks);

        assert_eq!(l.parent(&blocks[3], 1).unwrap(), Some(blocks[2].clone()));
        assert_eq!(l.parent(&blocks[3], 3).unwrap(), Some(blocks[0].clone()));
        assert_eq!(l.parent(&blocks[3], 4).unwrap(), None);
        assert_eq!(l.parent(&blocks[3], 0).unwrap(), None);
        assert_eq!(l.child(&blocks[1]).unwrap(), Some(blocks[2].clone()));
        assert_eq!(l.child(&blocks[3]).unwrap(), None);
        assert_eq!(l.block_by_id(&blocks[2].id()).unwrap(), Some(blocks[2].clone()));
    }

    #[test]
    fn tip_and_stats_snapshot() {
        let l = ledger(3, 2);
        assert_eq!(
            l.tip().unwrap(),
            ChainTip {
                height: 0,
                id: None,
                score: Score::zero()
            }
        );

        let blocks = BlockFactory::new(1).chain(3, |_| vec![1]);
        append_all(&l, &blocks);
        let stats = l.stats().unwrap();
        assert_eq!(stats.height, 3);
        assert_eq!(stats.last_block_id, Some(blocks[2].id()));
        assert_eq!(stats.accepted_features.get(&1), Some(&3));
        assert_eq!(l.tip().unwrap().score, stats.score);
    }

    #[test]
    fn verify_deep_clean_ledger() {
        let l = ledger(3, 2);
        append_all(&l, &BlockFactory::new(1).chain(7, |_| vec![1]));
        let report = l.verify_deep().unwrap();
        assert!(report.is_consistent(), "{:?}", report.problems);
        assert_eq!(report.blocks_checked, 7);
    }

    // --- concurrency ---

    #[test]
    fn readers_see_resolvable_tips_during_appends() {
        let l = Arc::new(ledger(5, 3));
        let blocks = BlockFactory::new(1).chain(200, |h| vec![(h % 4) as u16]);

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let l = Arc::clone(&l);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let tip = l.tip().unwrap();
                        if let Some(id) = tip.id {
                            assert_eq!(l.height_of(&id).unwrap(), Some(tip.height));
                        }
                    }
                })
            })
            .collect();

        for block in &blocks {
            l.append_block(block, ok).unwrap();
        }
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(l.height().unwrap(), 200);
    }
}
