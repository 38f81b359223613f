//! A key-value store persisted to a single JSON file.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{Result, StorageError};
use crate::store::KeyValueStore;

/// Distinguishes temp files of concurrent writers in one process.
static NEXT_TEMP_ID: AtomicU64 = AtomicU64::new(0);

/// A store that keeps every entry in one JSON object on disk.
///
/// The whole file is rewritten on each mutation. Writes go to a temporary
/// file in the same directory which is then renamed over the target, so a
/// crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    data: RwLock<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// Open the store at `path`, loading existing entries.
    ///
    /// A missing file is treated as an empty store and is created on the
    /// first write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StorageError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(StorageError::io(path, err)),
        };

        tracing::debug!(
            target: "bindery_storage::file",
            path = %path.display(),
            entries = data.len(),
            "opened store"
        );

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `mutate` to a copy of the entries, persist it, then publish it.
    ///
    /// On a failed write the in-memory entries are left unchanged.
    fn update<R>(&self, mutate: impl FnOnce(&mut BTreeMap<String, Value>) -> R) -> Result<R> {
        let mut data = self.data.write();
        let mut next = data.clone();
        let result = mutate(&mut next);
        self.persist(&next)?;
        *data = next;
        Ok(result)
    }

    fn persist(&self, data: &BTreeMap<String, Value>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(data).map_err(|source| StorageError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store".to_string());
        let temp_path = parent.join(format!(
            ".{}.tmp.{}.{}",
            file_name,
            std::process::id(),
            NEXT_TEMP_ID.fetch_add(1, Ordering::Relaxed)
        ));

        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            drop(file);
            fs::rename(&temp_path, &self.path)
        };

        if let Err(err) = write() {
            let _ = fs::remove_file(&temp_path);
            tracing::error!(
                target: "bindery_storage::file",
                path = %self.path.display(),
                error = %err,
                "failed to persist store"
            );
            return Err(StorageError::io(&self.path, err));
        }

        tracing::trace!(
            target: "bindery_storage::file",
            path = %self.path.display(),
            bytes = bytes.len(),
            "persisted store"
        );
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get_value(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn set_value(&self, key: &str, value: Value) -> Result<()> {
        self.update(|data| {
            data.insert(key.to_string(), value);
        })
    }

    fn remove(&self, key: &str) -> Result<Option<Value>> {
        if !self.data.read().contains_key(key) {
            return Ok(None);
        }
        self.update(|data| data.remove(key))
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.data.read().contains_key(key))
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.data.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("prefs.json")).unwrap();
        assert!(store.keys().unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        {
            let store = JsonFileStore::open(&path).unwrap();
            store.set_value("theme", json!("dark")).unwrap();
            store.set_value("window", json!({ "width": 1024 })).unwrap();
            store.set_value("stale", json!(true)).unwrap();
            assert_eq!(store.remove("stale").unwrap(), Some(json!(true)));
        }

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get_value("theme").unwrap(), Some(json!("dark")));
        assert_eq!(
            reopened.get_value("window").unwrap(),
            Some(json!({ "width": 1024 }))
        );
        assert!(!reopened.contains("stale").unwrap());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("prefs.json")).unwrap();
        store.set_value("a", json!(1)).unwrap();
        store.set_value("b", json!(2)).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["prefs.json".to_string()]);
    }

    #[test]
    fn test_stores_sharing_a_path_write_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let handles: Vec<_> = (0..4)
            .map(|writer| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let store = JsonFileStore::open(&path).unwrap();
                    for i in 0..25 {
                        store
                            .set_value(&format!("w{writer}"), json!(i))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let reopened = JsonFileStore::open(&path).unwrap();
        assert!(!reopened.keys().unwrap().is_empty());
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["prefs.json".to_string()]);
    }

    #[test]
    fn test_corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        let err = JsonFileStore::open(&path).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[test]
    fn test_failed_write_keeps_memory_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("prefs.json");
        let store = JsonFileStore::open(&path).unwrap();

        let err = store.set_value("a", json!(1)).unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));
        assert!(!store.contains("a").unwrap());
    }
}
