//! Storage layer for the tangle: a byte-blob store abstraction with
//! in-memory and LMDB backends, plus the reference-counted object cache that
//! every entity family (messages, metadata, approvers, outputs, branches)
//! is accessed through.

pub mod blob;
pub mod error;
pub mod lmdb;
pub mod memory;
pub mod object_storage;
pub mod prefix;

pub use blob::BlobStore;
pub use error::StoreError;
pub use lmdb::LmdbBlobStore;
pub use memory::MemoryBlobStore;
pub use object_storage::{CachedObject, ObjectStorage, StorageObject};
