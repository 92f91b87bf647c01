//! In-memory blob store backed by a `BTreeMap` (ordered keys make prefix
//! scans a range query). Used by tests and by nodes running without
//! persistence.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::blob::BlobStore;
use crate::StoreError;

#[derive(Default)]
pub struct MemoryBlobStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.entries.read().expect("blob map lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::Fault("blob map lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::Fault("blob map lock poisoned".into()))?;
        entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::Fault("blob map lock poisoned".into()))?;
        entries.remove(key);
        Ok(())
    }

    fn iterate(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::Fault("blob map lock poisoned".into()))?;
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let store = MemoryBlobStore::new();
        store.put(b"a", b"1").unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        store.delete(b"a").unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
    }

    #[test]
    fn iterate_respects_prefix() {
        let store = MemoryBlobStore::new();
        store.put(b"\x01aa", b"1").unwrap();
        store.put(b"\x01ab", b"2").unwrap();
        store.put(b"\x02aa", b"3").unwrap();

        let hits = store.iterate(b"\x01").unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|(k, _)| k[0] == 1));
    }

    #[test]
    fn overwrite_replaces() {
        let store = MemoryBlobStore::new();
        store.put(b"k", b"old").unwrap();
        store.put(b"k", b"new").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"new".to_vec()));
        assert_eq!(store.len(), 1);
    }
}
