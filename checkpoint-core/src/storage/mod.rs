/*!
Storage adapters for checkpoint persistence.

The store above this module only deals in bytes and storage keys; where and how
those bytes land is decided by a [`StorageAdapter`]. Every adapter must make
`save` atomic: a reader either sees the previous object or the complete new one.
*/

pub mod local;

use crate::{CheckpointError, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub use local::LocalFileStorage;

/// Storage abstraction for checkpoint bytes
#[cfg_attr(test, mockall::automock)]
pub trait StorageAdapter {
    /// Atomically replace the object at `key` with `data`
    ///
    /// On failure the previous object, if any, must remain readable and unchanged.
    fn save(&self, data: &[u8], key: &str) -> Result<()>;

    /// Read the object at `key`
    ///
    /// Returns [`CheckpointError::NotFound`] when nothing is stored there.
    fn load(&self, key: &str) -> Result<Vec<u8>>;

    /// Check whether an object exists at `key`
    fn exists(&self, key: &str) -> bool;

    /// Remove the object at `key`; removing a missing object is not an error
    fn delete(&self, key: &str) -> Result<()>;

    /// Names of the direct children below `prefix`, sorted
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

impl<S: StorageAdapter + ?Sized> StorageAdapter for Box<S> {
    fn save(&self, data: &[u8], key: &str) -> Result<()> {
        (**self).save(data, key)
    }

    fn load(&self, key: &str) -> Result<Vec<u8>> {
        (**self).load(key)
    }

    fn exists(&self, key: &str) -> bool {
        (**self).exists(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list(prefix)
    }
}

/// In-memory storage adapter
///
/// Keeps objects in a map behind a mutex. Clones share the same map, which lets
/// tests hand one clone to a store and inspect the raw bytes through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite raw bytes without any checks, used to simulate on-disk damage
    pub fn put_raw(&self, key: &str, data: Vec<u8>) {
        self.objects().insert(key.to_string(), data);
    }

    fn objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // A poisoned map still holds consistent whole objects.
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StorageAdapter for MemoryStorage {
    fn save(&self, data: &[u8], key: &str) -> Result<()> {
        self.objects().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Vec<u8>> {
        self.objects()
            .get(key)
            .cloned()
            .ok_or_else(|| CheckpointError::not_found(format!("no object stored at '{key}'")))
    }

    fn exists(&self, key: &str) -> bool {
        self.objects().contains_key(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.objects().remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = if prefix.is_empty() || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{prefix}/")
        };
        let mut names: Vec<String> = self
            .objects()
            .keys()
            .filter_map(|key| key.strip_prefix(prefix.as_str()))
            .filter_map(|rest| rest.split('/').next())
            .map(str::to_string)
            .collect();
        names.dedup();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();

        storage.save(b"snapshot", "run_a/checkpoint.json.gz").unwrap();
        assert!(storage.exists("run_a/checkpoint.json.gz"));
        assert_eq!(storage.load("run_a/checkpoint.json.gz").unwrap(), b"snapshot");

        storage.delete("run_a/checkpoint.json.gz").unwrap();
        assert!(!storage.exists("run_a/checkpoint.json.gz"));
    }

    #[test]
    fn test_memory_storage_missing_key() {
        let storage = MemoryStorage::new();
        let err = storage.load("missing").unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[test]
    fn test_memory_storage_list() {
        let storage = MemoryStorage::new();
        storage.save(b"1", "run_b/checkpoint.json.gz").unwrap();
        storage.save(b"2", "run_a/checkpoint.json.gz").unwrap();
        storage.save(b"3", "run_a/extra").unwrap();

        assert_eq!(storage.list("").unwrap(), vec!["run_a", "run_b"]);
        assert_eq!(
            storage.list("run_a").unwrap(),
            vec!["checkpoint.json.gz", "extra"]
        );
    }

    #[test]
    fn test_clones_share_objects() {
        let storage = MemoryStorage::new();
        let observer = storage.clone();
        storage.save(b"x", "k").unwrap();
        assert!(observer.exists("k"));
    }
}
