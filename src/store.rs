//! Object storage seam plus two implementations: a directory-per-bucket
//! filesystem store and an in-memory store.

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use walkdir::WalkDir;

/// A readable byte stream handed to or returned from a store.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

const PART_SUFFIX: &str = ".part";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Other(String),
}

/// Metadata attached to an uploaded object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: String,
    pub content_encoding: Option<String>,
}

impl PutOptions {
    pub fn gzip_json() -> Self {
        Self { content_type: "application/json".into(), content_encoding: Some("gzip".into()) }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<ByteStream, StoreError>;

    /// Upload `body` until it reports end of stream. An error from `body`
    /// must abort the upload without leaving an object behind.
    /// Returns an upload identifier.
    async fn put_streaming(&self, bucket: &str, key: &str, body: ByteStream, opts: PutOptions) -> Result<String, StoreError>;
}

/// Non-empty relative path made only of plain names, so joining it under a
/// root cannot escape that root.
pub(crate) fn is_contained_path(s: &str) -> bool {
    !s.is_empty() && Path::new(s).components().all(|c| matches!(c, Component::Normal(_)))
}

fn new_upload_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ----------------------------- Local filesystem ----------------------------------

/// Buckets are directories under `root`; keys are relative paths inside them.
#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn root(&self) -> &Path { &self.root }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        if !is_contained_path(bucket) || !is_contained_path(key) {
            return Err(StoreError::Other(format!("invalid object path: {}/{}", bucket, key)));
        }
        Ok(self.root.join(bucket).join(key))
    }

    /// Every object key in `bucket`, sorted. In-flight uploads are skipped.
    pub async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.root.join(bucket);
        tokio::task::spawn_blocking(move || -> Result<Vec<String>, StoreError> {
            if !dir.is_dir() {
                return Err(StoreError::NotFound(dir.display().to_string()));
            }
            let mut keys = Vec::new();
            for entry in WalkDir::new(&dir).sort_by_file_name() {
                let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                if name.starts_with('.') && name.ends_with(PART_SUFFIX) {
                    continue;
                }
                if let Ok(rel) = entry.path().strip_prefix(&dir) {
                    let key: Vec<String> = rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
                    keys.push(key.join("/"));
                }
            }
            Ok(keys)
        })
        .await
        .map_err(|e| StoreError::Other(format!("list task failed: {}", e)))?
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<ByteStream, StoreError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::File::open(&path).await {
            Ok(f) => Ok(Box::new(tokio::io::BufReader::new(f))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(format!("{}/{}", bucket, key))),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn put_streaming(&self, bucket: &str, key: &str, mut body: ByteStream, opts: PutOptions) -> Result<String, StoreError> {
        let path = self.object_path(bucket, key)?;
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
        tokio::fs::create_dir_all(&parent).await?;

        let upload_id = new_upload_id();
        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let tmp = PartFile::new(parent.join(format!(".{}.{}{}", file_name, upload_id, PART_SUFFIX)));

        let written = async {
            let f = tokio::fs::File::create(tmp.path()).await?;
            let mut w = BufWriter::new(f);
            let n = tokio::io::copy(&mut body, &mut w).await?;
            w.flush().await?;
            w.into_inner().sync_all().await?;
            Ok::<u64, io::Error>(n)
        }
        .await;

        // on error the guard removes the part file
        let bytes = written?;
        tokio::fs::rename(tmp.path(), &path).await?;
        tmp.persisted();

        tracing::debug!(
            path = %path.display(),
            bytes,
            content_type = %opts.content_type,
            content_encoding = opts.content_encoding.as_deref().unwrap_or(""),
            "stored object"
        );
        Ok(upload_id)
    }
}

/// Removes an in-flight upload's part file when dropped, unless it was promoted.
/// Covers error returns and a put future dropped mid-stream.
struct PartFile {
    path: PathBuf,
    keep: bool,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn path(&self) -> &Path { &self.path }

    fn persisted(mut self) {
        self.keep = true;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.keep {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

// ----------------------------- In-memory ----------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub options: PutOptions,
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<AHashMap<(String, String), StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&self, bucket: &str, key: &str, bytes: impl Into<Vec<u8>>) {
        let obj = StoredObject {
            bytes: bytes.into(),
            options: PutOptions { content_type: "application/octet-stream".into(), content_encoding: None },
        };
        self.objects.lock().insert((bucket.to_string(), key.to_string()), obj);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects.lock().get(&(bucket.to_string(), key.to_string())).cloned()
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects.lock().contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn len(&self) -> usize { self.objects.lock().len() }
    pub fn is_empty(&self) -> bool { self.objects.lock().is_empty() }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<ByteStream, StoreError> {
        match self.object(bucket, key) {
            Some(obj) => Ok(Box::new(io::Cursor::new(obj.bytes))),
            None => Err(StoreError::NotFound(format!("{}/{}", bucket, key))),
        }
    }

    async fn put_streaming(&self, bucket: &str, key: &str, mut body: ByteStream, opts: PutOptions) -> Result<String, StoreError> {
        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes).await?;
        let obj = StoredObject { bytes, options: opts };
        self.objects.lock().insert((bucket.to_string(), key.to_string()), obj);
        Ok(new_upload_id())
    }
}
