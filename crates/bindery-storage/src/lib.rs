//! Key-value storage adapters for Bindery.
//!
//! Stores implement the synchronous [`KeyValueStore`] trait over JSON values.
//! [`Storage`] wraps any store with a typed API whose operations run on a
//! [`DispatchQueue`](bindery_core::DispatchQueue) and report through
//! [`Task`](bindery_core::Task)s, so reads and writes never block UI code.
//!
//! - [`MemoryStore`]: process-local defaults
//! - [`JsonFileStore`]: one JSON file, rewritten atomically on every change
//!
//! A typed lookup of an absent key fails with [`StorageError::KeyNotFound`],
//! whose message names the key.

mod error;
mod file;
mod storage;
mod store;

pub use error::{Result, StorageError};
pub use file::JsonFileStore;
pub use storage::Storage;
pub use store::{KeyValueStore, MemoryStore};
