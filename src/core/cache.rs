use crate::utils::fs::atomic_write_sync;
use crate::utils::hash::key_hash;
use crate::{MirrorError, Result, constants::*};
use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Two-level cache: Memory -> Disk -> compute
///
/// Entries live in `<root>/<blake3(key)>` as MessagePack. Two callers racing
/// on the same key both compute and the last write wins.
pub struct DiskCache {
    root: PathBuf,
    memory: Mutex<LruCache<String, Bytes>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let capacity = NonZeroUsize::new(MEMORY_CACHE_ENTRIES).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            root,
            memory: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(key_hash(key))
    }

    fn memory(&self) -> Result<std::sync::MutexGuard<'_, LruCache<String, Bytes>>> {
        self.memory
            .lock()
            .map_err(|_| MirrorError::Cache("memory cache lock poisoned".to_string()))
    }

    fn read(&self, key: &str) -> Result<Option<Bytes>> {
        // Check memory cache
        if let Some(data) = self.memory()?.get(key) {
            return Ok(Some(data.clone()));
        }

        // Check disk cache
        match std::fs::read(self.key_path(key)) {
            Ok(data) => {
                let bytes = Bytes::from(data);
                // Promote to memory cache
                self.memory()?.put(key.to_string(), bytes.clone());
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, data: Bytes) -> Result<()> {
        atomic_write_sync(&self.key_path(key), &data)?;
        self.memory()?.put(key.to_string(), data);
        Ok(())
    }

    /// Return the cached value for `key`, computing and storing it on a miss
    pub fn get_or_compute<V, F>(&self, key: &str, compute: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<V>,
    {
        if let Some(data) = self.read(key)? {
            match rmp_serde::from_slice::<V>(&data) {
                Ok(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!("Discarding unreadable cache entry for {}: {}", key, e);
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = compute()?;
        let data = rmp_serde::to_vec(&value)
            .map_err(|e| MirrorError::Cache(format!("Failed to encode {}: {}", key, e)))?;
        self.write(key, Bytes::from(data))?;
        Ok(value)
    }

    pub fn invalidate(&self, key: &str) -> Result<()> {
        self.memory()?.pop(key);
        match std::fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn clear(&self) -> Result<()> {
        self.memory()?.clear();
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)?;
        }
        std::fs::create_dir_all(&self.root)?;
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        Ok(())
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
