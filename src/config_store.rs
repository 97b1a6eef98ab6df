//! Where rule configuration text comes from.

use crate::store::{is_contained_path, StoreError};
use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<String, StoreError>;
}

/// Reads `<root>/<path>` from disk. A leading `/` in `path` is ignored, so
/// parameter-style names like `/cloudtrail/rules` map to files under `root`.
#[derive(Clone, Debug)]
pub struct FileConfigStore {
    root: PathBuf,
}

impl FileConfigStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn get(&self, path: &str) -> Result<String, StoreError> {
        let rel = path.trim_start_matches('/');
        if !is_contained_path(rel) {
            return Err(StoreError::Other(format!("invalid config path: {}", path)));
        }
        let full = self.root.join(rel);
        match tokio::fs::read_to_string(&full).await {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(path.to_string())),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    values: Mutex<AHashMap<String, String>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self { Self::default() }

    pub fn with(self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(path, value);
        self
    }

    pub fn set(&self, path: impl Into<String>, value: impl Into<String>) {
        self.values.lock().insert(path.into(), value.into());
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, path: &str) -> Result<String, StoreError> {
        self.values.lock().get(path).cloned().ok_or_else(|| StoreError::NotFound(path.to_string()))
    }
}

/// TTL cache in front of another config store. Failed lookups are not cached.
pub struct CachedConfigStore<C> {
    inner: C,
    ttl: Duration,
    entries: Mutex<AHashMap<String, (Instant, String)>>,
}

impl<C: ConfigStore> CachedConfigStore<C> {
    pub fn new(inner: C, ttl: Duration) -> Self {
        Self { inner, ttl, entries: Mutex::new(AHashMap::new()) }
    }

    pub fn invalidate(&self, path: &str) {
        self.entries.lock().remove(path);
    }
}

#[async_trait]
impl<C: ConfigStore> ConfigStore for CachedConfigStore<C> {
    async fn get(&self, path: &str) -> Result<String, StoreError> {
        let hit = {
            let entries = self.entries.lock();
            entries.get(path).filter(|(at, _)| at.elapsed() < self.ttl).map(|(_, v)| v.clone())
        };
        if let Some(v) = hit {
            return Ok(v);
        }
        let fresh = self.inner.get(path).await?;
        self.entries.lock().insert(path.to_string(), (Instant::now(), fresh.clone()));
        Ok(fresh)
    }
}
