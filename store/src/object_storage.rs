//! Reference-counted cached views over the blob store.
//!
//! Every entity family is accessed through an [`ObjectStorage`], which hands
//! out [`CachedObject`] views. The underlying object stays in memory while
//! any view is alive and for `cache_time` after the last release; writes go
//! through to the blob store immediately. Releasing happens in `Drop`, so a
//! view is released on every exit path of the scope that acquired it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use crate::blob::BlobStore;
use crate::StoreError;

/// Minimum in-memory retention after the last view release.
pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(60);

/// An object that can live in an [`ObjectStorage`] family.
pub trait StorageObject: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The object's key within its family (without the family prefix).
    fn storage_key(&self) -> Vec<u8>;
}

struct ObjectInner<T> {
    value: RwLock<T>,
    handles: AtomicUsize,
    released_at: Mutex<Instant>,
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A reference-counted view of a cached object.
///
/// Reads take the object's shared lock; mutation takes the exclusive lock and
/// persists the new state write-through before returning, so mutation is
/// serialized per object id and the blob store never lags behind the cache.
pub struct CachedObject<T: StorageObject> {
    inner: Arc<ObjectInner<T>>,
    full_key: Vec<u8>,
    blob: Arc<dyn BlobStore>,
}

impl<T: StorageObject> CachedObject<T> {
    /// Read the object through the view.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = read_lock(&self.inner.value);
        f(&guard)
    }

    /// Mutate the object through the view and persist the result.
    pub fn write<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, StoreError> {
        let mut guard = write_lock(&self.inner.value);
        let result = f(&mut guard);
        let bytes = bincode::serialize(&*guard)?;
        self.blob.put(&self.full_key, &bytes)?;
        Ok(result)
    }

    /// Clone out the current state of the object.
    pub fn cloned(&self) -> T
    where
        T: Clone,
    {
        self.read(|value| value.clone())
    }
}

impl<T: StorageObject> Drop for CachedObject<T> {
    fn drop(&mut self) {
        if self.inner.handles.fetch_sub(1, Ordering::AcqRel) == 1 {
            let mut released_at = match self.inner.released_at.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *released_at = Instant::now();
        }
    }
}

/// A cached, write-through store for one entity family.
pub struct ObjectStorage<T: StorageObject> {
    blob: Arc<dyn BlobStore>,
    prefix: u8,
    cache_time: Duration,
    cache: Mutex<HashMap<Vec<u8>, Arc<ObjectInner<T>>>>,
}

impl<T: StorageObject> ObjectStorage<T> {
    pub fn new(blob: Arc<dyn BlobStore>, prefix: u8, cache_time: Duration) -> Self {
        Self {
            blob,
            prefix,
            cache_time,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(1 + key.len());
        full.push(self.prefix);
        full.extend_from_slice(key);
        full
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<Vec<u8>, Arc<ObjectInner<T>>>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn acquire(&self, full_key: Vec<u8>, inner: &Arc<ObjectInner<T>>) -> CachedObject<T> {
        inner.handles.fetch_add(1, Ordering::AcqRel);
        CachedObject {
            inner: Arc::clone(inner),
            full_key,
            blob: Arc::clone(&self.blob),
        }
    }

    fn fresh_inner(value: T) -> Arc<ObjectInner<T>> {
        Arc::new(ObjectInner {
            value: RwLock::new(value),
            handles: AtomicUsize::new(0),
            released_at: Mutex::new(Instant::now()),
        })
    }

    fn insert_entry(&self, full_key: &[u8], value: T) -> Arc<ObjectInner<T>> {
        let inner = Self::fresh_inner(value);
        self.lock_cache()
            .insert(full_key.to_vec(), Arc::clone(&inner));
        inner
    }

    /// Store `object`, replacing any existing state, and return a view of it.
    pub fn store(&self, object: T) -> Result<CachedObject<T>, StoreError> {
        let full_key = self.full_key(&object.storage_key());
        let bytes = bincode::serialize(&object)?;
        self.blob.put(&full_key, &bytes)?;
        let inner = self.insert_entry(&full_key, object);
        Ok(self.acquire(full_key, &inner))
    }

    /// Store `object` unless its key is already present. Returns the view and
    /// whether this call created the entry.
    ///
    /// The cache lock spans the existence check and the insert, so concurrent
    /// callers storing the same key agree on exactly one creator.
    pub fn store_if_absent(&self, object: T) -> Result<(CachedObject<T>, bool), StoreError> {
        let full_key = self.full_key(&object.storage_key());
        let mut cache = self.lock_cache();

        if let Some(inner) = cache.get(&full_key) {
            let inner = Arc::clone(inner);
            drop(cache);
            return Ok((self.acquire(full_key, &inner), false));
        }
        if let Some(bytes) = self.blob.get(&full_key)? {
            let value: T = bincode::deserialize(&bytes)?;
            let inner = Self::fresh_inner(value);
            cache.insert(full_key.clone(), Arc::clone(&inner));
            drop(cache);
            return Ok((self.acquire(full_key, &inner), false));
        }

        let bytes = bincode::serialize(&object)?;
        self.blob.put(&full_key, &bytes)?;
        let inner = Self::fresh_inner(object);
        cache.insert(full_key.clone(), Arc::clone(&inner));
        drop(cache);
        Ok((self.acquire(full_key, &inner), true))
    }

    /// Load a view of the object stored under `key`, if any.
    pub fn load(&self, key: &[u8]) -> Result<Option<CachedObject<T>>, StoreError> {
        let full_key = self.full_key(key);
        let mut cache = self.lock_cache();

        if let Some(inner) = cache.get(&full_key) {
            let inner = Arc::clone(inner);
            drop(cache);
            return Ok(Some(self.acquire(full_key, &inner)));
        }
        match self.blob.get(&full_key)? {
            Some(bytes) => {
                let value: T = bincode::deserialize(&bytes)?;
                let inner = Self::fresh_inner(value);
                cache.insert(full_key.clone(), Arc::clone(&inner));
                drop(cache);
                Ok(Some(self.acquire(full_key, &inner)))
            }
            None => Ok(None),
        }
    }

    /// Load the object under `key`, inserting `factory()` if it is absent.
    /// Returns the view and whether this call created the entry. Atomic like
    /// [`store_if_absent`](Self::store_if_absent).
    pub fn get_or_insert_with(
        &self,
        key: &[u8],
        factory: impl FnOnce() -> T,
    ) -> Result<(CachedObject<T>, bool), StoreError> {
        let full_key = self.full_key(key);
        let mut cache = self.lock_cache();

        if let Some(inner) = cache.get(&full_key) {
            let inner = Arc::clone(inner);
            drop(cache);
            return Ok((self.acquire(full_key, &inner), false));
        }
        if let Some(bytes) = self.blob.get(&full_key)? {
            let value: T = bincode::deserialize(&bytes)?;
            let inner = Self::fresh_inner(value);
            cache.insert(full_key.clone(), Arc::clone(&inner));
            drop(cache);
            return Ok((self.acquire(full_key, &inner), false));
        }

        let object = factory();
        let bytes = bincode::serialize(&object)?;
        self.blob.put(&full_key, &bytes)?;
        let inner = Self::fresh_inner(object);
        cache.insert(full_key.clone(), Arc::clone(&inner));
        drop(cache);
        Ok((self.acquire(full_key, &inner), true))
    }

    /// Whether an object is stored under `key` (cached or persisted).
    pub fn contains(&self, key: &[u8]) -> Result<bool, StoreError> {
        let full_key = self.full_key(key);
        if self.lock_cache().contains_key(&full_key) {
            return Ok(true);
        }
        self.blob.contains(&full_key)
    }

    /// Remove the object under `key` from the cache and the blob store.
    pub fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let full_key = self.full_key(key);
        self.lock_cache().remove(&full_key);
        self.blob.delete(&full_key)
    }

    /// Evict cache entries with no outstanding views whose retention window
    /// has elapsed. Objects are write-through, so eviction never loses state.
    pub fn sweep(&self) {
        let cache_time = self.cache_time;
        self.lock_cache().retain(|_, inner| {
            if inner.handles.load(Ordering::Acquire) > 0 {
                return true;
            }
            let released_at = match inner.released_at.lock() {
                Ok(guard) => *guard,
                Err(poisoned) => *poisoned.into_inner(),
            };
            released_at.elapsed() < cache_time
        });
    }

    /// Drop every cache entry. Safe because writes are write-through.
    pub fn flush(&self) {
        self.lock_cache().clear();
    }

    /// Number of currently cached entries.
    pub fn cached_len(&self) -> usize {
        self.lock_cache().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlobStore;
    use serde::Deserialize;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Counter {
        key: [u8; 4],
        count: u64,
    }

    impl StorageObject for Counter {
        fn storage_key(&self) -> Vec<u8> {
            self.key.to_vec()
        }
    }

    fn storage(cache_time: Duration) -> ObjectStorage<Counter> {
        ObjectStorage::new(Arc::new(MemoryBlobStore::new()), 9, cache_time)
    }

    #[test]
    fn store_and_load_round_trip() {
        let storage = storage(DEFAULT_CACHE_TIME);
        let counter = Counter {
            key: *b"aaaa",
            count: 1,
        };
        storage.store(counter.clone()).unwrap();

        let view = storage.load(b"aaaa").unwrap().expect("stored object");
        assert_eq!(view.cloned(), counter);
        assert!(storage.load(b"bbbb").unwrap().is_none());
    }

    #[test]
    fn write_is_write_through() {
        let blob = Arc::new(MemoryBlobStore::new());
        let storage = ObjectStorage::<Counter>::new(
            Arc::clone(&blob) as Arc<dyn BlobStore>,
            9,
            Duration::ZERO,
        );
        let view = storage
            .store(Counter {
                key: *b"cccc",
                count: 0,
            })
            .unwrap();
        view.write(|c| c.count = 42).unwrap();
        drop(view);

        // evict the cache and reload from the blob store
        storage.sweep();
        assert_eq!(storage.cached_len(), 0);
        let view = storage.load(b"cccc").unwrap().unwrap();
        assert_eq!(view.read(|c| c.count), 42);
    }

    #[test]
    fn sweep_keeps_held_views() {
        let storage = storage(Duration::ZERO);
        let view = storage
            .store(Counter {
                key: *b"dddd",
                count: 0,
            })
            .unwrap();

        storage.sweep();
        assert_eq!(storage.cached_len(), 1);

        drop(view);
        storage.sweep();
        assert_eq!(storage.cached_len(), 0);
    }

    #[test]
    fn store_if_absent_reports_creation() {
        let storage = storage(DEFAULT_CACHE_TIME);
        let counter = Counter {
            key: *b"eeee",
            count: 7,
        };
        let (_, created) = storage.store_if_absent(counter.clone()).unwrap();
        assert!(created);

        let (view, created) = storage
            .store_if_absent(Counter {
                key: *b"eeee",
                count: 99,
            })
            .unwrap();
        assert!(!created);
        // the original state wins
        assert_eq!(view.read(|c| c.count), 7);
    }

    #[test]
    fn get_or_insert_with_uses_factory_once() {
        let storage = storage(DEFAULT_CACHE_TIME);
        let (view, created) = storage
            .get_or_insert_with(b"ffff", || Counter {
                key: *b"ffff",
                count: 5,
            })
            .unwrap();
        assert!(created);
        drop(view);

        let (view, created) = storage
            .get_or_insert_with(b"ffff", || Counter {
                key: *b"ffff",
                count: 500,
            })
            .unwrap();
        assert!(!created);
        assert_eq!(view.read(|c| c.count), 5);
    }

    #[test]
    fn delete_removes_everywhere() {
        let storage = storage(DEFAULT_CACHE_TIME);
        storage
            .store(Counter {
                key: *b"gggg",
                count: 0,
            })
            .unwrap();
        storage.delete(b"gggg").unwrap();
        assert!(storage.load(b"gggg").unwrap().is_none());
        assert!(!storage.contains(b"gggg").unwrap());
    }
}
