//! Shared test helpers for integration tests.

use std::collections::BTreeMap;

use tempfile::TempDir;

use strata_core::features::{ActivationSettings, FeatureSettings};
use strata_core::index::{Column, IndexRead, IndexedStore};
use strata_core::types::Block;
use strata_history::{BlockLedger, LedgerSettings, RocksStore};

/// Every column's entries, for exact before/after comparisons.
pub type Snapshot = BTreeMap<&'static str, Vec<(Vec<u8>, Vec<u8>)>>;

/// Ledger settings with a small voting window.
pub fn small_window(window: u64, min_votes: u64) -> LedgerSettings {
    LedgerSettings {
        activation: ActivationSettings::new(window, min_votes).unwrap(),
        features: FeatureSettings::default(),
        compaction_interval: 100,
    }
}

/// Open a RocksDB-backed ledger in a fresh temporary directory.
///
/// Keep the returned `TempDir` alive for as long as the ledger is used.
pub fn temp_ledger(settings: LedgerSettings) -> (BlockLedger<RocksStore>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let ledger = BlockLedger::open_path(dir.path().join("history"), settings).unwrap();
    (ledger, dir)
}

/// Append blocks in order, accepting every one.
pub fn append_all<S: IndexedStore>(ledger: &BlockLedger<S>, blocks: &[Block]) {
    for block in blocks {
        ledger.append_block(block, || Ok(())).unwrap();
    }
}

/// Read every column of the ledger's store.
pub fn snapshot<S: IndexedStore>(ledger: &BlockLedger<S>) -> Snapshot {
    let store = ledger.store();
    Column::ALL
        .iter()
        .map(|c| (c.name(), store.scan(*c).unwrap()))
        .collect()
}
