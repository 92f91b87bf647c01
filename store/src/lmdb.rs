//! LMDB blob store backed by a single heed database.

use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use crate::blob::{increment_prefix, BlobStore};
use crate::StoreError;

/// Default LMDB map size: 1 GiB.
const DEFAULT_MAP_SIZE: usize = 1 << 30;

pub struct LmdbBlobStore {
    env: Arc<Env>,
    objects_db: Database<Bytes, Bytes>,
}

fn heed_fault(e: heed::Error) -> StoreError {
    StoreError::Fault(e.to_string())
}

impl LmdbBlobStore {
    /// Open or create an LMDB environment at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with_map_size(path, DEFAULT_MAP_SIZE)
    }

    pub fn open_with_map_size(path: &Path, map_size: usize) -> Result<Self, StoreError> {
        std::fs::create_dir_all(path)
            .map_err(|e| StoreError::Fault(format!("failed to create directory: {e}")))?;

        let env = unsafe {
            EnvOpenOptions::new()
                .max_dbs(1)
                .map_size(map_size)
                .open(path)
                .map_err(heed_fault)?
        };

        let mut wtxn = env.write_txn().map_err(heed_fault)?;
        let objects_db = env
            .create_database(&mut wtxn, Some("objects"))
            .map_err(heed_fault)?;
        wtxn.commit().map_err(heed_fault)?;

        Ok(Self {
            env: Arc::new(env),
            objects_db,
        })
    }

    /// Flush dirty pages to disk. LMDB commits durably per write transaction;
    /// this is the extra shutdown-time sync the node performs before exiting.
    pub fn force_sync(&self) -> Result<(), StoreError> {
        let wtxn = self.env.write_txn().map_err(heed_fault)?;
        wtxn.commit().map_err(heed_fault)?;
        Ok(())
    }
}

impl BlobStore for LmdbBlobStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let rtxn = self.env.read_txn().map_err(heed_fault)?;
        let value = self.objects_db.get(&rtxn, key).map_err(heed_fault)?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(heed_fault)?;
        self.objects_db
            .put(&mut wtxn, key, value)
            .map_err(heed_fault)?;
        wtxn.commit().map_err(heed_fault)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(heed_fault)?;
        self.objects_db.delete(&mut wtxn, key).map_err(heed_fault)?;
        wtxn.commit().map_err(heed_fault)?;
        Ok(())
    }

    fn iterate(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut upper = prefix.to_vec();
        increment_prefix(&mut upper);

        let rtxn = self.env.read_txn().map_err(heed_fault)?;
        let upper_bound = if upper.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(upper.as_slice())
        };
        let bounds = (Bound::Included(prefix), upper_bound);
        let iter = self.objects_db.range(&rtxn, &bounds).map_err(heed_fault)?;

        let mut results = Vec::new();
        for entry in iter {
            let (key, value) = entry.map_err(heed_fault)?;
            results.push((key.to_vec(), value.to_vec()));
        }
        Ok(results)
    }
}
