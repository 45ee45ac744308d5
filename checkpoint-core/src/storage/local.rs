/*!
Local filesystem storage adapter.
*/

use super::StorageAdapter;
use crate::{CheckpointError, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Local filesystem storage adapter
///
/// Objects are written to a temporary file in the destination directory, flushed
/// to disk and then renamed over the destination. A crash at any point before the
/// rename leaves the previous file untouched.
///
/// # Example
/// ```rust
/// use checkpoint_core::storage::{LocalFileStorage, StorageAdapter};
///
/// let dir = tempfile::TempDir::new().unwrap();
/// let storage = LocalFileStorage::with_base_dir(dir.path());
/// storage.save(b"snapshot bytes", "mycheckpoint/checkpoint.json.gz")?;
/// assert!(storage.exists("mycheckpoint/checkpoint.json.gz"));
/// # Ok::<(), checkpoint_core::CheckpointError>(())
/// ```
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    /// Optional base directory for all checkpoints
    base_dir: Option<PathBuf>,
}

impl LocalFileStorage {
    /// Storage that uses keys as paths verbatim
    pub fn new() -> Self {
        Self { base_dir: None }
    }

    /// Storage that resolves keys relative to `base_dir`
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: Some(base_dir.as_ref().to_path_buf()),
        }
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    fn resolve_path(&self, key: &str) -> PathBuf {
        match &self.base_dir {
            Some(base) => base.join(key),
            None => PathBuf::from(key),
        }
    }

    fn ensure_parent_dir(&self, path: &Path) -> Result<PathBuf> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !parent.exists() {
            fs::create_dir_all(&parent)?;
        }
        Ok(parent)
    }
}

impl Default for LocalFileStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageAdapter for LocalFileStorage {
    fn save(&self, data: &[u8], key: &str) -> Result<()> {
        let full_path = self.resolve_path(key);
        let parent = self.ensure_parent_dir(&full_path)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".checkpoint-")
            .suffix(".tmp")
            .tempfile_in(&parent)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;

        // Dropping the temp file on an early return removes it.
        tmp.persist(&full_path).map_err(|e| CheckpointError::StorageIo(e.error))?;

        #[cfg(unix)]
        {
            if let Err(e) = fs::File::open(&parent).and_then(|dir| dir.sync_all()) {
                warn!(dir = %parent.display(), error = %e, "Failed to sync checkpoint directory");
            }
        }

        debug!(path = %full_path.display(), bytes = data.len(), "Checkpoint file committed");
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Vec<u8>> {
        let full_path = self.resolve_path(key);
        fs::read(&full_path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                CheckpointError::not_found(format!("no checkpoint file at {}", full_path.display()))
            }
            _ => CheckpointError::StorageIo(e),
        })
    }

    fn exists(&self, key: &str) -> bool {
        self.resolve_path(key).is_file()
    }

    fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.resolve_path(key);
        if full_path.exists() {
            fs::remove_file(&full_path)?;
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.resolve_path(prefix);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            // Leftovers of interrupted writes are not objects.
            if name.starts_with(".checkpoint-") {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_file_storage_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());
        let key = "run_a/checkpoint.json.gz";

        storage.save(b"test checkpoint data", key).unwrap();
        assert!(storage.exists(key));
        assert_eq!(storage.load(key).unwrap(), b"test checkpoint data");

        storage.delete(key).unwrap();
        assert!(!storage.exists(key));
    }

    #[test]
    fn test_save_overwrites_atomically() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());
        let key = "run_a/checkpoint.json.gz";

        storage.save(b"first", key).unwrap();
        storage.save(b"second", key).unwrap();
        assert_eq!(storage.load(key).unwrap(), b"second");

        // No temporary files are left behind after a commit.
        let leftovers: Vec<_> = fs::read_dir(temp_dir.path().join("run_a"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["checkpoint.json.gz"]);
    }

    #[test]
    fn test_failed_save_keeps_previous_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());
        let key = "run_a/checkpoint.json.gz";
        storage.save(b"committed", key).unwrap();

        // A directory in place of the destination makes the rename fail.
        let blocked = "run_a/blocked";
        fs::create_dir_all(temp_dir.path().join(blocked).join("child")).unwrap();
        assert!(storage.save(b"never visible", blocked).is_err());

        assert_eq!(storage.load(key).unwrap(), b"committed");
        assert_eq!(storage.list("run_a").unwrap(), vec!["blocked", "checkpoint.json.gz"]);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());

        let err = storage.load("missing/checkpoint.json.gz").unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[test]
    fn test_list_missing_prefix_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());
        assert!(storage.list("nothing_here").unwrap().is_empty());
    }
}
