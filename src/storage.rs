//! Durable snapshot storage behind a narrow key/value interface
//!
//! Keys are session ids; values are opaque serialized records. The file
//! backend writes each snapshot to a temp file in the data directory and
//! renames it over the target, so a crash never leaves a half-written record.

use crate::errors::StorageError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

const SNAPSHOT_EXTENSION: &str = "json";
const TEMP_PREFIX: &str = ".tmp";

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Returns whether a record was present
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && key.len() <= 128
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// One JSON file per key inside a data directory
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: Arc<PathBuf>,
}

impl FileSnapshotStore {
    /// Open (creating if needed) the data directory and clear leftover temp files
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(TEMP_PREFIX) {
                warn!(file = ?entry.path(), "Removing stale temp file");
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    warn!(error = %e, "Failed to remove stale temp file");
                }
            }
        }

        Ok(Self { dir: Arc::new(dir) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, SNAPSHOT_EXTENSION))
    }
}

/// Flush the directory entry so a completed rename survives power loss
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_key(key)?;
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        validate_key(key)?;
        let dir = self.dir.clone();
        let target = self.path_for(key);
        let value = value.to_vec();

        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut tmp = tempfile::Builder::new()
                .prefix(TEMP_PREFIX)
                .tempfile_in(dir.as_path())?;
            tmp.write_all(&value)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| StorageError::Io(e.error))?;
            sync_dir(dir.as_path())?;
            Ok(())
        })
        .await??;

        debug!(key, "Snapshot written");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(self.dir.as_path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_key(stem).is_ok() {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Volatile backend; also used to inject write failures in tests
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    records: DashMap<String, Vec<u8>>,
    fail_next_puts: AtomicU32,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` puts fail with a backend error
    pub fn fail_next_puts(&self, count: u32) {
        self.fail_next_puts.store(count, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write raw bytes, bypassing key checks and failure injection
    pub fn insert_raw(&self, key: &str, value: &[u8]) {
        self.records.insert(key.to_string(), value.to_vec());
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_key(key)?;
        Ok(self.records.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        validate_key(key)?;
        let injected = self
            .fail_next_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::Backend("injected write failure".to_string()));
        }
        self.records.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        Ok(self.records.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self.records.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(feature = "rocksdb")]
pub use rocks::RocksSnapshotStore;

#[cfg(feature = "rocksdb")]
mod rocks {
    use super::{validate_key, SnapshotStore};
    use crate::errors::StorageError;
    use async_trait::async_trait;
    use rocksdb::{IteratorMode, Options, DB};
    use std::path::Path;
    use std::sync::Arc;

    const SESSION_PREFIX: &str = "session:";

    /// RocksDB-backed snapshot store
    #[derive(Clone)]
    pub struct RocksSnapshotStore {
        db: Arc<DB>,
    }

    impl RocksSnapshotStore {
        pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
            let mut opts = Options::default();
            opts.create_if_missing(true);
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
            let db = DB::open(&opts, path)?;
            Ok(Self { db: Arc::new(db) })
        }

        fn db_key(key: &str) -> Vec<u8> {
            format!("{}{}", SESSION_PREFIX, key).into_bytes()
        }
    }

    #[async_trait]
    impl SnapshotStore for RocksSnapshotStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            validate_key(key)?;
            let db = self.db.clone();
            let k = Self::db_key(key);
            Ok(tokio::task::spawn_blocking(move || db.get(k)).await??)
        }

        async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
            validate_key(key)?;
            let db = self.db.clone();
            let k = Self::db_key(key);
            let v = value.to_vec();
            tokio::task::spawn_blocking(move || db.put(k, v)).await??;
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<bool, StorageError> {
            validate_key(key)?;
            let db = self.db.clone();
            let k = Self::db_key(key);
            let existed = tokio::task::spawn_blocking(move || -> Result<bool, rocksdb::Error> {
                let existed = db.get(&k)?.is_some();
                db.delete(&k)?;
                Ok(existed)
            })
            .await??;
            Ok(existed)
        }

        async fn keys(&self) -> Result<Vec<String>, StorageError> {
            let db = self.db.clone();
            tokio::task::spawn_blocking(move || -> Result<Vec<String>, StorageError> {
                let mut keys = Vec::new();
                for item in db.iterator(IteratorMode::Start) {
                    let (k, _) = item?;
                    if let Some(rest) = k.strip_prefix(SESSION_PREFIX.as_bytes()) {
                        keys.push(String::from_utf8_lossy(rest).into_owned());
                    }
                }
                Ok(keys)
            })
            .await?
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::open(dir.path()).unwrap();

        store.put("abc-1", b"{\"x\":1}").await.unwrap();
        store.put("abc-1", b"{\"x\":2}").await.unwrap();
        assert_eq!(store.get("abc-1").await.unwrap().unwrap(), b"{\"x\":2}");
        assert_eq!(store.keys().await.unwrap(), vec!["abc-1".to_string()]);

        assert!(store.delete("abc-1").await.unwrap());
        assert!(!store.delete("abc-1").await.unwrap());
        assert!(store.get("abc-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_write_is_visible_after_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileSnapshotStore::open(dir.path()).unwrap();
            store.put("sess-7", b"{\"credits\":40}").await.unwrap();
        }

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["sess-7.json".to_string()]);

        let reopened = FileSnapshotStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("sess-7").await.unwrap().unwrap(), b"{\"credits\":40}");
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::open(dir.path()).unwrap();
        let err = store.put("../escape", b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_file_store_removes_stale_temp_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".tmpLEFTOVER"), b"partial").unwrap();
        let store = FileSnapshotStore::open(dir.path()).unwrap();
        assert!(!dir.path().join(".tmpLEFTOVER").exists());
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_injected_failures() {
        let store = MemorySnapshotStore::new();
        store.fail_next_puts(1);
        assert!(store.put("k", b"v").await.is_err());
        assert!(store.put("k", b"v").await.is_ok());
        assert_eq!(store.len(), 1);
    }
}
