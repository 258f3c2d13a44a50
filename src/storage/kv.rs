//! Key-value media behind the cache buckets.
//!
//! - [`ProcessCache`]: a concurrent map shared by every handle in the process
//! - [`FileStore`]: one file per key in a directory, guarded by advisory
//!   locks so several processes can share it
//!
//! Reads and writes are individually atomic. A read-modify-write sequence
//! across two calls is not, and concurrent writers to one key may overwrite
//! each other.

use super::Medium;
use crate::error::StorageError;
use dashmap::DashMap;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Minimal key-value contract used by [`super::CacheBucket`].
pub trait KvStore: Send + Sync {
    /// Short name of the medium, used in log fields
    fn name(&self) -> &'static str;

    fn medium(&self) -> Medium;

    fn available(&self) -> bool;

    /// Whether calls block on I/O and belong on the blocking thread pool.
    fn blocking(&self) -> bool {
        false
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Returns whether the key existed.
    fn delete(&self, key: &str) -> Result<bool, StorageError>;
}

/// In-process cache. Clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct ProcessCache {
    entries: Arc<DashMap<String, String>>,
    disabled: bool,
}

impl ProcessCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache that reports itself unavailable, as when the extension is
    /// missing on a host.
    pub fn disabled() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            disabled: true,
        }
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.disabled {
            return Err(StorageError::Unavailable("process cache disabled".to_string()));
        }
        Ok(())
    }
}

impl KvStore for ProcessCache {
    fn name(&self) -> &'static str {
        "process_cache"
    }

    fn medium(&self) -> Medium {
        Medium::SharedCache
    }

    fn available(&self) -> bool {
        !self.disabled
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.check()?;
        Ok(self.entries.remove(key).is_some())
    }
}

/// Directory-backed store shared between processes.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if !super::is_valid_bucket_name(key) {
            return Err(StorageError::InvalidBucketName(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KvStore for FileStore {
    fn name(&self) -> &'static str {
        "shared_memory"
    }

    fn medium(&self) -> Medium {
        Medium::SharedMemory
    }

    fn available(&self) -> bool {
        self.dir.is_dir()
    }

    fn blocking(&self) -> bool {
        true
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        FileExt::lock_shared(&file)?;
        let mut contents = String::new();
        let read = file.read_to_string(&mut contents);
        FileExt::unlock(&file)?;
        read?;

        Ok(Some(contents))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        // Truncate only once the lock is held
        #[allow(clippy::suspicious_open_options)]
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;

        FileExt::lock_exclusive(&file)?;
        let written = file
            .set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| file.write_all(value.as_bytes()))
            .and_then(|_| file.flush());
        FileExt::unlock(&file)?;
        written?;

        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
