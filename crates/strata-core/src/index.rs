//! Indexed storage capability and in-memory implementation.
//!
//! The history store keeps its state in a handful of ordered key/value
//! columns. [`IndexedStore`] is the capability the ledger needs from a
//! storage engine: point reads, ordered scans, and one atomic `commit` of a
//! [`ChangeSet`]. The production node uses RocksDB (strata-history); the
//! [`MemoryStore`] is suitable for testing.
//!
//! Mutations are never applied piecemeal. A writer stages them in a
//! [`Staging`] overlay, which reads through to the base store so later steps
//! of the same operation observe earlier ones, and then hands the resulting
//! change set to [`IndexedStore::commit`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::StoreError;

/// A named column of the history store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Column {
    /// Height → raw block bytes.
    Blocks,
    /// Height → block id.
    Signatures,
    /// Block id → height.
    SignaturesReverse,
    /// Height → cumulative score.
    Score,
    /// Window opening height → vote tally.
    FeatureVotes,
    /// Feature id → acceptance height.
    FeatureState,
    /// Tip height and schema version.
    Metadata,
}

impl Column {
    pub const ALL: [Column; 7] = [
        Column::Blocks,
        Column::Signatures,
        Column::SignaturesReverse,
        Column::Score,
        Column::FeatureVotes,
        Column::FeatureState,
        Column::Metadata,
    ];

    /// Column family name on disk.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::Signatures => "signatures",
            Self::SignaturesReverse => "signatures-reverse",
            Self::Score => "score",
            Self::FeatureVotes => "features-votes",
            Self::FeatureState => "features-state",
            Self::Metadata => "metadata",
        }
    }
}

/// Pending puts (`Some`) and deletes (`None`) grouped by column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    ops: BTreeMap<Column, BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, column: Column, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops
            .entry(column)
            .or_default()
            .insert(key.into(), Some(value.into()));
    }

    pub fn delete(&mut self, column: Column, key: impl Into<Vec<u8>>) {
        self.ops.entry(column).or_default().insert(key.into(), None);
    }

    /// Staged state of one key: `None` if untouched, `Some(None)` if deleted.
    pub fn get(&self, column: Column, key: &[u8]) -> Option<Option<&[u8]>> {
        self.ops
            .get(&column)?
            .get(key)
            .map(|v| v.as_deref())
    }

    /// All staged operations in column, then key, order.
    pub fn iter(&self) -> impl Iterator<Item = (Column, &[u8], Option<&[u8]>)> {
        self.ops.iter().flat_map(|(column, ops)| {
            ops.iter()
                .map(move |(k, v)| (*column, k.as_slice(), v.as_deref()))
        })
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.ops.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read access to the columns.
pub trait IndexRead {
    /// Point lookup. Returns `None` if the key is absent.
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// All entries of a column in ascending key order.
    fn scan(&self, column: Column) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Number of entries in a column.
    ///
    /// Default implementation scans the column; override when the engine
    /// can count more cheaply.
    fn count(&self, column: Column) -> Result<u64, StoreError> {
        Ok(self.scan(column)?.len() as u64)
    }
}

/// Storage engine capability used by the history store.
///
/// Not synchronized on its own: the ledger serializes writers and excludes
/// readers during a commit.
pub trait IndexedStore: IndexRead + Send + Sync {
    /// Apply every operation in `changes` as one durable unit.
    fn commit(&mut self, changes: ChangeSet) -> Result<(), StoreError>;

    /// Reclaim space and merge on-disk structures.
    fn compact(&self) -> Result<(), StoreError>;
}

/// Write overlay over a readable store.
///
/// Reads consult the staged operations first and fall back to the base.
pub struct Staging<'a, R: IndexRead + ?Sized> {
    base: &'a R,
    changes: ChangeSet,
}

impl<'a, R: IndexRead + ?Sized> Staging<'a, R> {
    pub fn new(base: &'a R) -> Self {
        Self {
            base,
            changes: ChangeSet::new(),
        }
    }

    pub fn put(&mut self, column: Column, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.changes.put(column, key, value);
    }

    pub fn delete(&mut self, column: Column, key: impl Into<Vec<u8>>) {
        self.changes.delete(column, key);
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub fn into_changes(self) -> ChangeSet {
        self.changes
    }
}

impl<R: IndexRead + ?Sized> IndexRead for Staging<'_, R> {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self.changes.get(column, key) {
            Some(staged) => Ok(staged.map(<[u8]>::to_vec)),
            None => self.base.get(column, key),
        }
    }

    fn scan(&self, column: Column) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self.base.scan(column)?.into_iter().collect();
        for (c, key, value) in self.changes.iter() {
            if c != column {
                continue;
            }
            match value {
                Some(v) => {
                    merged.insert(key.to_vec(), v.to_vec());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }
}

/// In-memory history storage for testing.
///
/// Stores every column in a `BTreeMap` with no persistence. Counts commits
/// and compaction requests so tests can observe the writer's behaviour.
#[derive(Debug, Default)]
pub struct MemoryStore {
    columns: BTreeMap<Column, BTreeMap<Vec<u8>, Vec<u8>>>,
    commits: u64,
    compactions: AtomicU64,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> u64 {
        self.commits
    }

    /// Number of compaction requests.
    pub fn compaction_count(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }

    /// Write a single entry, bypassing change sets.
    ///
    /// Only useful for simulating damaged stores in tests.
    pub fn put_raw(&mut self, column: Column, key: &[u8], value: &[u8]) {
        self.columns
            .entry(column)
            .or_default()
            .insert(key.to_vec(), value.to_vec());
    }

    /// Exact copy of every column, for before/after comparisons.
    pub fn dump(&self) -> BTreeMap<Column, BTreeMap<Vec<u8>, Vec<u8>>> {
        self.columns
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(c, entries)| (*c, entries.clone()))
            .collect()
    }
}

impl IndexRead for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .columns
            .get(&column)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn scan(&self, column: Column) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self
            .columns
            .get(&column)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn count(&self, column: Column) -> Result<u64, StoreError> {
        Ok(self.columns.get(&column).map_or(0, |e| e.len() as u64))
    }
}

impl IndexedStore for MemoryStore {
    fn commit(&mut self, changes: ChangeSet) -> Result<(), StoreError> {
        for (column, key, value) in changes.iter() {
            let entries = self.columns.entry(column).or_default();
            match value {
                Some(v) => {
                    entries.insert(key.to_vec(), v.to_vec());
                }
                None => {
                    entries.remove(key);
                }
            }
        }
        self.commits += 1;
        Ok(())
    }

    fn compact(&self) -> Result<(), StoreError> {
        self.compactions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
