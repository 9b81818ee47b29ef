//! In-memory store backend for testing

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::{ObjectBody, ObjectMeta, ObjectStore, StoreError, StoreResult};

/// Chunk size used when replaying a stored body as a stream.
const CHUNK_SIZE: usize = 64 * 1024;

/// In-memory object store. The test double for every pipeline test.
pub struct MemoryStore {
    objects: RwLock<HashMap<String, (Bytes, ObjectMeta)>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored objects whose key starts with `prefix`.
    pub async fn count_with_prefix(&self, prefix: &str) -> usize {
        let objects = self.objects.read().await;
        objects.keys().filter(|k| k.starts_with(prefix)).count()
    }

    /// All stored keys, for assertions.
    pub async fn keys(&self) -> Vec<String> {
        let objects = self.objects.read().await;
        objects.keys().cloned().collect()
    }

    fn etag_for(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        tags: HashMap<String, String>,
    ) -> StoreResult<ObjectMeta> {
        let meta = ObjectMeta {
            size: data.len() as u64,
            etag: Self::etag_for(&data),
            content_type: content_type.to_string(),
            tags,
            last_modified: Some(chrono::Utc::now()),
        };

        let mut objects = self.objects.write().await;
        objects.insert(key.to_string(), (data, meta.clone()));
        Ok(meta)
    }

    async fn get(&self, key: &str) -> StoreResult<ObjectBody> {
        let objects = self.objects.read().await;
        let (data, meta) = objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let data = data.clone();
        let meta = meta.clone();
        drop(objects);

        let chunks: Vec<StoreResult<Bytes>> = (0..data.len())
            .step_by(CHUNK_SIZE)
            .map(|start| {
                let end = (start + CHUNK_SIZE).min(data.len());
                Ok(data.slice(start..end))
            })
            .collect();

        Ok(ObjectBody {
            meta,
            stream: futures::stream::iter(chunks).boxed(),
        })
    }

    async fn head(&self, key: &str) -> StoreResult<ObjectMeta> {
        let objects = self.objects.read().await;
        objects
            .get(key)
            .map(|(_, meta)| meta.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn copy(&self, from: &str, to: &str, tags: HashMap<String, String>) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        let (data, meta) = objects
            .get(from)
            .ok_or_else(|| StoreError::NotFound(from.to_string()))?;
        let data = data.clone();
        let mut meta = meta.clone();
        meta.tags = tags;
        meta.last_modified = Some(chrono::Utc::now());
        objects.insert(to.to_string(), (data, meta));
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        objects.remove(key);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment_tags;
    use futures::TryStreamExt;

    async fn collect(body: ObjectBody) -> Bytes {
        let chunks: Vec<Bytes> = body.stream.try_collect().await.unwrap();
        Bytes::from(chunks.concat())
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryStore::new();
        let data = Bytes::from("Hello, World!");

        let meta = store
            .put("r1-test.txt", data.clone(), "text/plain", HashMap::new())
            .await
            .unwrap();
        assert_eq!(meta.size, 13);

        let body = store.get("r1-test.txt").await.unwrap();
        assert_eq!(collect(body).await, data);
    }

    #[tokio::test]
    async fn test_head_reports_tags() {
        let store = MemoryStore::new();
        store
            .put("k", Bytes::from("x"), "text/plain", attachment_tags("att-1"))
            .await
            .unwrap();

        let meta = store.head("k").await.unwrap();
        assert_eq!(meta.attachment_key(), Some("att-1"));
    }

    #[tokio::test]
    async fn test_copy_replaces_tags() {
        let store = MemoryStore::new();
        store
            .put("src", Bytes::from("body"), "text/plain", attachment_tags("old"))
            .await
            .unwrap();

        store
            .copy("src", "dst", attachment_tags("new"))
            .await
            .unwrap();

        let meta = store.head("dst").await.unwrap();
        assert_eq!(meta.attachment_key(), Some("new"));
        assert_eq!(meta.size, 4);
        // source untouched
        assert_eq!(store.head("src").await.unwrap().attachment_key(), Some("old"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        store
            .put("k", Bytes::from("x"), "text/plain", HashMap::new())
            .await
            .unwrap();

        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(matches!(store.head("k").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_streams_large_bodies_in_chunks() {
        let store = MemoryStore::new();
        let data = Bytes::from(vec![7u8; CHUNK_SIZE * 2 + 17]);
        store
            .put("big", data.clone(), "application/octet-stream", HashMap::new())
            .await
            .unwrap();

        let body = store.get("big").await.unwrap();
        let chunks: Vec<Bytes> = body.stream.try_collect().await.unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(Bytes::from(chunks.concat()), data);
    }
}
