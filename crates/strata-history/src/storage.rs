//! RocksDB-backed history storage.
//!
//! Implements [`IndexedStore`] with one column family per [`Column`]. A
//! [`ChangeSet`] is translated into a single [`WriteBatch`], so every append
//! or discard reaches disk as one atomic write.

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};

use strata_core::error::StoreError;
use strata_core::index::{ChangeSet, Column, IndexRead, IndexedStore};

/// RocksDB-backed persistent history storage.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all column families if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = Column::ALL
            .iter()
            .map(|c| ColumnFamilyDescriptor::new(c.name(), Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        tracing::debug!(path = %path.as_ref().display(), "opened history database");
        Ok(Self { db })
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn cf_handle(&self, column: Column) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(column.name())
            .ok_or_else(|| StoreError::MissingColumn(column.name().to_string()))
    }
}

impl IndexRead for RocksStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf_handle(column)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn scan(&self, column: Column) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let cf = self.cf_handle(column)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    fn count(&self, column: Column) -> Result<u64, StoreError> {
        let cf = self.cf_handle(column)?;
        let mut n = 0u64;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            item.map_err(|e| StoreError::Backend(e.to_string()))?;
            n += 1;
        }
        Ok(n)
    }
}

impl IndexedStore for RocksStore {
    fn commit(&mut self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut batch = WriteBatch::default();
        for (column, key, value) in changes.iter() {
            let cf = self.cf_handle(column)?;
            match value {
                Some(v) => batch.put_cf(cf, key, v),
                None => batch.delete_cf(cf, key),
            }
        }
        self.db
            .write(batch)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Trigger manual compaction across all column families.
    ///
    /// Compaction merges SSTables and reclaims space from deleted keys.
    fn compact(&self) -> Result<(), StoreError> {
        for column in Column::ALL {
            let cf = self.cf_handle(column)?;
            self.db.compact_range_cf(&cf, None::<&[u8]>, None::<&[u8]>);
        }
        Ok(())
    }
}
