//! Typed, task-returning access to a [`KeyValueStore`].

use std::fmt;
use std::sync::Arc;

use bindery_core::{DispatchQueue, Exception, Task};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StorageError;
use crate::store::KeyValueStore;

/// Typed access to a store, with every operation run on a queue.
///
/// Values are converted through `serde_json`. Operations are submitted to the
/// queue as soon as they are called; the returned [`Task`] reports the result.
///
/// # Example
///
/// ```
/// use bindery_core::DispatchQueue;
/// use bindery_storage::{MemoryStore, Storage};
///
/// let storage = Storage::new(MemoryStore::new(), &DispatchQueue::serial("prefs"));
/// storage.set("volume", 7_u8).wait().unwrap();
///
/// assert_eq!(storage.get::<u8>("volume").wait().unwrap(), 7);
/// let missing = storage.get::<u8>("balance").wait().unwrap_err();
/// assert_eq!(missing.to_string(), "key not found: balance");
/// ```
pub struct Storage<S> {
    store: Arc<S>,
    queue: DispatchQueue,
}

impl<S> Clone for Storage<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            queue: self.queue.clone(),
        }
    }
}

impl<S: KeyValueStore + 'static> Storage<S> {
    /// Wrap `store`, running operations on `queue`.
    pub fn new(store: S, queue: &DispatchQueue) -> Self {
        Self::from_shared(Arc::new(store), queue)
    }

    /// Wrap a store that is shared with other owners.
    pub fn from_shared(store: Arc<S>, queue: &DispatchQueue) -> Self {
        Self {
            store,
            queue: queue.clone(),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The queue operations run on.
    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    fn submit<T, F>(&self, work: F) -> Task<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&S) -> Result<T, Exception> + Send + 'static,
    {
        let store = self.store.clone();
        let task = Task::new(&self.queue, move || work(store.as_ref()));
        task.start();
        task
    }

    /// Read the value stored under `key`.
    ///
    /// Fails with [`StorageError::KeyNotFound`] if there is none.
    pub fn get<T>(&self, key: impl Into<String>) -> Task<T>
    where
        T: DeserializeOwned + Clone + Send + 'static,
    {
        let key = key.into();
        self.submit(move |store| {
            let value = store
                .get_value(&key)?
                .ok_or_else(|| StorageError::key_not_found(&key))?;
            let value = serde_json::from_value(value)
                .map_err(|source| StorageError::serialization(&key, source))?;
            Ok(value)
        })
    }

    /// Read the value stored under `key`, or `default` if there is none.
    pub fn get_or<T>(&self, key: impl Into<String>, default: T) -> Task<T>
    where
        T: DeserializeOwned + Clone + Send + 'static,
    {
        self.get(key).chain_on_fail(move |err| {
            if matches!(
                err.downcast_ref::<StorageError>(),
                Some(StorageError::KeyNotFound { .. })
            ) {
                Task::value(default)
            } else {
                Task::failed(err)
            }
        })
    }

    /// Store `value` under `key`.
    ///
    /// The value is converted before this returns; a conversion failure
    /// yields an already failed task.
    pub fn set<T>(&self, key: impl Into<String>, value: T) -> Task<()>
    where
        T: Serialize,
    {
        let key = key.into();
        let value = match serde_json::to_value(&value) {
            Ok(value) => value,
            Err(source) => return Task::failed(StorageError::serialization(key, source)),
        };
        tracing::trace!(target: "bindery_storage", key = %key, "storing value");
        self.submit(move |store| Ok(store.set_value(&key, value)?))
    }

    /// Remove `key`. The task succeeds with whether a value was removed.
    pub fn remove(&self, key: impl Into<String>) -> Task<bool> {
        let key = key.into();
        self.submit(move |store| Ok(store.remove(&key)?.is_some()))
    }

    /// Check whether `key` holds a value.
    pub fn contains(&self, key: impl Into<String>) -> Task<bool> {
        let key = key.into();
        self.submit(move |store| Ok(store.contains(&key)?))
    }

    /// All stored keys.
    pub fn keys(&self) -> Task<Vec<String>> {
        self.submit(|store| Ok(store.keys()?))
    }
}

impl<S> fmt::Debug for Storage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
