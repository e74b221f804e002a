//! Durable key/value storage for the signed-version cache.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::types::Address;

/// String key/value store scoped to one user profile.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// A single JSON object file of string values.
///
/// Every write replaces the whole file through a temporary sibling and a
/// rename. A missing or unparseable file reads as empty; the next write
/// replaces it.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries, failing on a file that does not parse.
    pub fn entry_count(&self) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_strict()?.len())
    }

    fn read_err(&self, reason: String) -> StoreError {
        StoreError::Read {
            path: self.path.display().to_string(),
            reason,
        }
    }

    fn read_strict(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(self.read_err(e.to_string())),
        };
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).map_err(|e| self.read_err(e.to_string()))
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) if !contents.trim().is_empty() => {
                match serde_json::from_str(&contents) {
                    Ok(entries) => Ok(entries),
                    Err(e) => {
                        warn!(path = %self.path.display(), error = %e, "resetting unreadable store file");
                        Ok(BTreeMap::new())
                    }
                }
            }
            Ok(_) => Ok(BTreeMap::new()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(self.read_err(e.to_string())),
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let write_err = |reason: String| StoreError::Write {
            path: self.path.display().to_string(),
            reason,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
        }
        let contents =
            serde_json::to_vec_pretty(entries).map_err(|e| write_err(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).map_err(|e| write_err(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| write_err(e.to_string()))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

/// Highest terms version each address is known to have signed.
#[derive(Clone)]
pub struct SignedVersionCache {
    store: Arc<dyn KeyValueStore>,
}

impl SignedVersionCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn key(address: &Address) -> String {
        format!("onboard_signedVersion_{address}")
    }

    /// Persisted version for `address`. Values that are not a JSON
    /// non-negative integer are removed and read as absent.
    pub fn get(&self, address: &Address) -> Result<Option<u32>, StoreError> {
        let key = Self::key(address);
        let Some(raw) = self.store.get(&key)? else {
            return Ok(None);
        };
        let version = serde_json::from_str::<Value>(&raw)
            .ok()
            .and_then(|value| value.as_u64())
            .and_then(|v| u32::try_from(v).ok());
        if version.is_none() {
            warn!(%address, value = %raw, "discarding corrupt onboarding cache entry");
            self.store.remove(&key)?;
        }
        Ok(version)
    }

    /// Persist `version` if it is strictly greater than the stored value.
    /// Returns whether a write happened.
    pub fn record(&self, address: &Address, version: u32) -> Result<bool, StoreError> {
        if self.get(address)?.is_some_and(|current| current >= version) {
            return Ok(false);
        }
        self.store.set(&Self::key(address), &version.to_string())?;
        debug!(%address, version, "persisted signed version");
        Ok(true)
    }
}
