use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

/// Trait for a synchronous string key-value store (the browser's local storage,
/// or whatever stands in for it).
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    fn remove(&self, key: &str) -> StorageResult<()>;
}

/// In-memory implementation of KeyValueStorage.
///
/// An optional byte quota (sum of key and value lengths across all entries)
/// makes writes fail with [`StorageError::QuotaExceeded`] the way a full
/// browser store does.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    entries: Arc<DashMap<String, String>>,
    quota: Option<usize>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            quota: None,
        }
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            quota: Some(quota_bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn used_bytes_excluding(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.key() != key)
            .map(|entry| entry.key().len() + entry.value().len())
            .sum()
    }
}

impl KeyValueStorage for InMemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        if let Some(quota) = self.quota {
            let used = self.used_bytes_excluding(key);
            let needed = key.len() + value.len();
            if used + needed > quota {
                return Err(StorageError::QuotaExceeded {
                    needed,
                    available: quota.saturating_sub(used),
                });
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// File-backed implementation of KeyValueStorage.
///
/// All keys live in one JSON object on disk. Every write rewrites the file via
/// a sibling temp file and a rename, so a crash leaves either the old or the
/// new contents.
///
/// Reads of a corrupt file fail with `Unavailable`. The next write moves the
/// corrupt file aside (`<name>.corrupt`) and starts from an empty object.
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StorageResult<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                StorageError::Unavailable(format!(
                    "corrupt storage file {}: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Current entries for a read-modify-write. A corrupt file is set aside.
    fn load_for_write(&self) -> StorageResult<BTreeMap<String, String>> {
        match self.load() {
            Err(StorageError::Unavailable(reason)) => {
                let backup = self.path.with_extension("corrupt");
                warn!("Discarding {}; moved to {}", reason, backup.display());
                if let Err(e) = fs::rename(&self.path, &backup) {
                    warn!("Could not keep corrupt storage file: {}", e);
                }
                Ok(BTreeMap::new())
            }
            other => other,
        }
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        let serialized = serde_json::to_string(entries)?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, serialized)?;
        fs::rename(&tmp_path, &self.path)?;
        debug!("Persisted {} keys to {}", entries.len(), self.path.display());
        Ok(())
    }

    fn guard(&self) -> StorageResult<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| StorageError::Unavailable("storage lock poisoned".to_string()))
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let _guard = self.guard()?;
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let _guard = self.guard()?;
        let mut entries = self.load_for_write()?;
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let _guard = self.guard()?;
        let mut entries = self.load_for_write()?;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_round_trip() {
        let storage = InMemoryStorage::new();
        assert_eq!(storage.get("missing").unwrap(), None);

        storage.set("key", "value").unwrap();
        assert_eq!(storage.get("key").unwrap().as_deref(), Some("value"));

        storage.remove("key").unwrap();
        assert_eq!(storage.get("key").unwrap(), None);
        // removing again is fine
        storage.remove("key").unwrap();
    }

    #[test]
    fn test_in_memory_quota() {
        let storage = InMemoryStorage::with_quota(20);
        storage.set("a", "0123456789").unwrap();

        let err = storage.set("b", "0123456789").unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { needed: 11, available: 9 }));

        // overwriting an existing key only counts the new value
        storage.set("a", "0123456789012345678").unwrap();
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");

        let storage = FileStorage::new(&path);
        assert_eq!(storage.get("auth_token").unwrap(), None);
        storage.set("auth_token", "abc").unwrap();
        storage.set("other", "1").unwrap();

        let reopened = FileStorage::new(&path);
        assert_eq!(reopened.get("auth_token").unwrap().as_deref(), Some("abc"));

        reopened.remove("auth_token").unwrap();
        assert_eq!(storage.get("auth_token").unwrap(), None);
        assert_eq!(storage.get("other").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_file_storage_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, "{ not json").unwrap();

        let storage = FileStorage::new(&path);
        assert!(matches!(
            storage.get("key"),
            Err(StorageError::Unavailable(_))
        ));

        // the next write replaces it and keeps the old bytes aside
        storage.set("key", "value").unwrap();
        assert_eq!(storage.get("key").unwrap().as_deref(), Some("value"));
        assert_eq!(
            fs::read_to_string(path.with_extension("corrupt")).unwrap(),
            "{ not json"
        );
    }
}
