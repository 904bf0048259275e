//! Consumer offset persistence
//!
//! The materializer records the broker sequence of every message it has
//! finished with, so a restart resumes right after it instead of skipping
//! to the newest message.

use crate::error::{LogError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Trait for persisting the last handled sequence per consumer
pub trait OffsetStore: Send + Sync {
    /// Last handled sequence for `consumer`, if any was saved
    fn load(&self, consumer: &str) -> Result<Option<u64>>;

    /// Record `sequence` as handled for `consumer`
    fn save(&self, consumer: &str, sequence: u64) -> Result<()>;
}

/// JSON file-based offset store
///
/// One object mapping consumer name to sequence. Writes go to a temp file
/// and are renamed over the original.
pub struct FileOffsetStore {
    path: PathBuf,
    offsets: std::sync::Mutex<Option<HashMap<String, u64>>>,
}

impl FileOffsetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offsets: std::sync::Mutex::new(None),
        }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<HashMap<String, u64>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let json = std::fs::read_to_string(&self.path).map_err(|e| {
            LogError::Config(format!(
                "Failed to read offset file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        serde_json::from_str(&json).map_err(|e| {
            LogError::Config(format!(
                "Failed to parse offset file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn write_file(&self, offsets: &HashMap<String, u64>) -> Result<()> {
        let json = serde_json::to_string_pretty(offsets)?;
        let tmp_path = self.path.with_extension("tmp");

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                LogError::Config(format!(
                    "Failed to create offset directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        std::fs::write(&tmp_path, json).map_err(|e| {
            LogError::Config(format!(
                "Failed to write offset file {}: {}",
                tmp_path.display(),
                e
            ))
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            LogError::Config(format!(
                "Failed to rename offset file {} to {}: {}",
                tmp_path.display(),
                self.path.display(),
                e
            ))
        })
    }
}

impl OffsetStore for FileOffsetStore {
    fn load(&self, consumer: &str) -> Result<Option<u64>> {
        let mut cached = self
            .offsets
            .lock()
            .map_err(|e| LogError::Internal(format!("Failed to acquire offset lock: {}", e)))?;

        if cached.is_none() {
            let offsets = self.read_file()?;
            tracing::debug!(
                path = %self.path.display(),
                consumers = offsets.len(),
                "Offsets loaded"
            );
            *cached = Some(offsets);
        }

        Ok(cached
            .as_ref()
            .and_then(|offsets| offsets.get(consumer).copied()))
    }

    fn save(&self, consumer: &str, sequence: u64) -> Result<()> {
        let mut cached = self
            .offsets
            .lock()
            .map_err(|e| LogError::Internal(format!("Failed to acquire offset lock: {}", e)))?;

        let offsets = match cached.as_mut() {
            Some(offsets) => offsets,
            None => cached.insert(self.read_file()?),
        };
        offsets.insert(consumer.to_string(), sequence);
        self.write_file(offsets)?;

        tracing::trace!(consumer, sequence, "Offset saved");
        Ok(())
    }
}

/// In-memory offset store for testing
#[derive(Default)]
pub struct MemoryOffsetStore {
    offsets: std::sync::RwLock<HashMap<String, u64>>,
}

impl OffsetStore for MemoryOffsetStore {
    fn load(&self, consumer: &str) -> Result<Option<u64>> {
        let offsets = self
            .offsets
            .read()
            .map_err(|e| LogError::Internal(format!("Failed to acquire offset lock: {}", e)))?;
        Ok(offsets.get(consumer).copied())
    }

    fn save(&self, consumer: &str, sequence: u64) -> Result<()> {
        let mut offsets = self
            .offsets
            .write()
            .map_err(|e| LogError::Internal(format!("Failed to acquire offset lock: {}", e)))?;
        offsets.insert(consumer.to_string(), sequence);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_save_load() {
        let store = MemoryOffsetStore::default();
        assert_eq!(store.load("materializer").unwrap(), None);

        store.save("materializer", 41).unwrap();
        store.save("materializer", 42).unwrap();
        store.save("other", 7).unwrap();

        assert_eq!(store.load("materializer").unwrap(), Some(42));
        assert_eq!(store.load("other").unwrap(), Some(7));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets.json");

        let store = FileOffsetStore::new(&path);
        store.save("materializer", 10).unwrap();
        store.save("audit", 3).unwrap();

        let reopened = FileOffsetStore::new(&path);
        assert_eq!(reopened.load("materializer").unwrap(), Some(10));
        assert_eq!(reopened.load("audit").unwrap(), Some(3));
        assert_eq!(reopened.path(), path.as_path());

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("materializer"));
    }

    #[test]
    fn test_file_store_load_nonexistent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOffsetStore::new(dir.path().join("missing.json"));
        assert_eq!(store.load("materializer").unwrap(), None);
    }

    #[test]
    fn test_file_store_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deep/offsets.json");

        FileOffsetStore::new(&path).save("materializer", 1).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets.json");
        std::fs::write(&path, "not json").unwrap();

        let err = FileOffsetStore::new(&path).load("materializer").unwrap_err();
        assert!(matches!(err, LogError::Config(_)));
    }
}
