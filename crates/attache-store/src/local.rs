//! Local filesystem store backend
//!
//! Local disks have no native metadata tags, so each object gets a JSON
//! sidecar file holding its [`ObjectMeta`]. Objects written by older
//! deployments may lack a sidecar; metadata is then recomputed from the
//! file itself.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::{ObjectBody, ObjectMeta, ObjectStore, StoreError, StoreResult};

const SIDECAR_SUFFIX: &str = ".meta.json";

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    size: u64,
    etag: String,
    content_type: String,
    tags: HashMap<String, String>,
    last_modified: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<&ObjectMeta> for Sidecar {
    fn from(meta: &ObjectMeta) -> Self {
        Self {
            size: meta.size,
            etag: meta.etag.clone(),
            content_type: meta.content_type.clone(),
            tags: meta.tags.clone(),
            last_modified: meta.last_modified,
        }
    }
}

impl From<Sidecar> for ObjectMeta {
    fn from(s: Sidecar) -> Self {
        Self {
            size: s.size,
            etag: s.etag,
            content_type: s.content_type,
            tags: s.tags,
            last_modified: s.last_modified,
        }
    }
}

/// Filesystem-backed object store.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Create a store rooted in the system temp directory.
    pub fn temp() -> std::io::Result<Self> {
        let dir = std::env::temp_dir().join("attache-store");
        std::fs::create_dir_all(&dir)?;
        Ok(Self::new(dir))
    }

    /// Resolve a key to a full path, rejecting traversal attempts.
    fn resolve_path(&self, key: &str) -> StoreResult<PathBuf> {
        if key.is_empty()
            || key.contains("..")
            || key.starts_with('/')
            || key.starts_with('\\')
            || key.ends_with(SIDECAR_SUFFIX)
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    async fn ensure_parent(path: &Path) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn etag_for(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    async fn write_sidecar(path: &Path, meta: &ObjectMeta) -> StoreResult<()> {
        let json = serde_json::to_vec(&Sidecar::from(meta))
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut file = fs::File::create(Self::sidecar_path(path)).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn read_meta(&self, key: &str, path: &Path) -> StoreResult<ObjectMeta> {
        match fs::read(Self::sidecar_path(path)).await {
            Ok(json) => {
                let sidecar: Sidecar = serde_json::from_slice(&json)
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                Ok(sidecar.into())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Pre-sidecar object: recompute from the file.
                let data = fs::read(path).await?;
                let fs_meta = fs::metadata(path).await?;
                Ok(ObjectMeta {
                    size: fs_meta.len(),
                    etag: Self::etag_for(&data),
                    content_type: mime_guess::from_path(key)
                        .first_or_octet_stream()
                        .to_string(),
                    tags: HashMap::new(),
                    last_modified: fs_meta.modified().ok().map(chrono::DateTime::from),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        tags: HashMap<String, String>,
    ) -> StoreResult<ObjectMeta> {
        let path = self.resolve_path(key)?;
        Self::ensure_parent(&path).await?;

        let meta = ObjectMeta {
            size: data.len() as u64,
            etag: Self::etag_for(&data),
            content_type: content_type.to_string(),
            tags,
            last_modified: Some(chrono::Utc::now()),
        };

        let mut file = fs::File::create(&path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        Self::write_sidecar(&path, &meta).await?;

        debug!(path = ?path, size = meta.size, "object stored");
        Ok(meta)
    }

    async fn get(&self, key: &str) -> StoreResult<ObjectBody> {
        let path = self.resolve_path(key)?;
        if !path.exists() {
            return Err(StoreError::NotFound(key.to_string()));
        }

        let meta = self.read_meta(key, &path).await?;
        let file = fs::File::open(&path).await?;
        let stream = ReaderStream::new(file)
            .map(|chunk| chunk.map_err(StoreError::Io))
            .boxed();

        Ok(ObjectBody { meta, stream })
    }

    async fn head(&self, key: &str) -> StoreResult<ObjectMeta> {
        let path = self.resolve_path(key)?;
        if !path.exists() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        self.read_meta(key, &path).await
    }

    async fn copy(&self, from: &str, to: &str, tags: HashMap<String, String>) -> StoreResult<()> {
        let from_path = self.resolve_path(from)?;
        let to_path = self.resolve_path(to)?;

        if !from_path.exists() {
            return Err(StoreError::NotFound(from.to_string()));
        }

        Self::ensure_parent(&to_path).await?;
        fs::copy(&from_path, &to_path).await?;

        let mut meta = self.read_meta(from, &from_path).await?;
        meta.tags = tags;
        meta.last_modified = Some(chrono::Utc::now());
        Self::write_sidecar(&to_path, &meta).await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.resolve_path(key)?;

        if path.exists() {
            fs::remove_file(&path).await?;
            debug!(path = ?path, "object deleted");
        }
        let sidecar = Self::sidecar_path(&path);
        if sidecar.exists() {
            fs::remove_file(&sidecar).await?;
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "local"
    }
}
