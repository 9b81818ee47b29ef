//! # attache-store
//!
//! Object store adapter for the Attache pipeline.
//!
//! The store is treated as a primitive with at-least-once semantics:
//! put/get/head/copy/delete by key, plus store-native metadata tags on every
//! object. Backends are injected into the pipeline rather than resolved from
//! any global handle, so tests can substitute [`MemoryStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

pub mod local;
pub mod memory;

pub use local::LocalStore;
pub use memory::MemoryStore;

/// Tag under which a final object records the attachment identity that
/// wrote it. Conflict checks compare this tag to tell an intentional
/// overwrite apart from a filename collision.
pub const ATTACHMENT_KEY_TAG: &str = "attachmentkey";

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store call timed out: {0}")]
    Timeout(String),
    #[error("Store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Authoritative object metadata, as reported by a read after the write.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Object size in bytes
    pub size: u64,
    /// Store-reported content hash (ETag or equivalent)
    pub etag: String,
    /// MIME content type
    pub content_type: String,
    /// Store-native metadata tags
    pub tags: HashMap<String, String>,
    /// Last modified time
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
}

impl ObjectMeta {
    /// The attachment identity tag, if the object carries one.
    pub fn attachment_key(&self) -> Option<&str> {
        self.tags.get(ATTACHMENT_KEY_TAG).map(String::as_str)
    }
}

/// A streamed object body with its metadata.
pub struct ObjectBody {
    pub meta: ObjectMeta,
    pub stream: BoxStream<'static, StoreResult<Bytes>>,
}

/// Convenience constructor for the tag map final objects are written with.
pub fn attachment_tags(attachment_key: &str) -> HashMap<String, String> {
    HashMap::from([(ATTACHMENT_KEY_TAG.to_string(), attachment_key.to_string())])
}

/// Unified interface over object store backends.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object under a key with the given tags.
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        tags: HashMap<String, String>,
    ) -> StoreResult<ObjectMeta>;

    /// Open an object for streaming.
    async fn get(&self, key: &str) -> StoreResult<ObjectBody>;

    /// Read object metadata without the body.
    async fn head(&self, key: &str) -> StoreResult<ObjectMeta>;

    /// Server-side copy. The destination is written with `tags`, not the
    /// source's tags; size, etag and content type carry over.
    async fn copy(&self, from: &str, to: &str, tags: HashMap<String, String>) -> StoreResult<()>;

    /// Delete an object. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_tags() {
        let tags = attachment_tags("k-1");
        assert_eq!(tags.get(ATTACHMENT_KEY_TAG).map(String::as_str), Some("k-1"));
    }

    #[test]
    fn test_meta_attachment_key() {
        let meta = ObjectMeta {
            size: 1,
            etag: "e".into(),
            content_type: "text/plain".into(),
            tags: attachment_tags("k-2"),
            last_modified: None,
        };
        assert_eq!(meta.attachment_key(), Some("k-2"));
    }
}
