//! Staging: uploads and server-side copies
//!
//! Every intent stages its content under a fresh temporary key. Staging is
//! embarrassingly parallel across intents; the orchestrator scatters one
//! task per intent and joins them all. A task that fails still reports any
//! temporary key it created, so rollback can delete it.

use std::future::Future;
use std::time::Duration;

use anyhow::anyhow;
use attache_core::PipelineError;
use attache_store::{attachment_tags, ObjectStore, StoreError, StoreResult};
use bytes::BytesMut;
use futures::StreamExt;
use tokio::time::Instant;
use tracing::debug;

use crate::intent::{AttachmentIntent, IntentSource, StagedItem, StagedObject};
use crate::keys;

/// Run a store call under the caller-supplied deadline, or the configured
/// per-call timeout when no deadline was given. A timed-out call is
/// indistinguishable from any other per-intent failure downstream.
pub(crate) async fn with_deadline<T>(
    deadline: Option<Instant>,
    timeout: Duration,
    what: &str,
    fut: impl Future<Output = StoreResult<T>>,
) -> StoreResult<T> {
    let limit = deadline.unwrap_or_else(|| Instant::now() + timeout);
    // An already-expired deadline fails without issuing the call; timeout_at
    // would let a ready future win the race.
    if limit <= Instant::now() {
        return Err(StoreError::Timeout(what.to_string()));
    }
    match tokio::time::timeout_at(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(what.to_string())),
    }
}

/// Result of one staging task.
pub(crate) struct StageResult {
    pub item: Option<StagedItem>,
    /// Temporary key created by this task, present even when the task
    /// failed after the write.
    pub temp_key: Option<String>,
    pub error: Option<PipelineError>,
}

impl StageResult {
    fn ok(item: StagedItem) -> Self {
        let temp_key = item.staged.as_ref().map(|s| s.temp_key.clone());
        Self {
            item: Some(item),
            temp_key,
            error: None,
        }
    }

    fn failed(temp_key: Option<String>, error: PipelineError) -> Self {
        Self {
            item: None,
            temp_key,
            error: Some(error),
        }
    }
}

fn upload_failed(attachment_key: &str, err: StoreError) -> PipelineError {
    PipelineError::UploadFailed {
        attachment_key: attachment_key.to_string(),
        source: anyhow::Error::new(err),
    }
}

/// Stage a single intent: upload, server-side copy, or nothing for
/// metadata-only entries.
pub(crate) async fn stage_intent(
    store: &dyn ObjectStore,
    intent: AttachmentIntent,
    timeout: Duration,
    deadline: Option<Instant>,
) -> StageResult {
    let AttachmentIntent {
        attachment_key,
        resource,
        filename,
        metadata,
        source,
    } = intent;
    let kind = source.kind();

    let bare = |staged: Option<StagedObject>, skipped: bool| StagedItem {
        attachment_key: attachment_key.clone(),
        resource: resource.clone(),
        filename: filename.clone(),
        kind,
        metadata: metadata.clone(),
        staged,
        skipped,
    };

    let display_name = match filename
        .as_deref()
        .or_else(|| metadata.get("fileName").and_then(serde_json::Value::as_str))
    {
        Some(name) => name.to_string(),
        None => {
            // Validation guarantees a name; staging never proceeds without one.
            return StageResult::failed(
                None,
                PipelineError::FileIntentMismatch {
                    detail: format!("intent {} is missing a filename", attachment_key),
                },
            );
        }
    };

    match source {
        IntentSource::NoFile => StageResult::ok(bare(None, false)),

        IntentSource::RawBytes(mut stream) => {
            // Await the full byte stream before touching the store.
            let mut buf = BytesMut::new();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => buf.extend_from_slice(&bytes),
                    Err(e) => {
                        return StageResult::failed(
                            None,
                            PipelineError::UploadFailed {
                                attachment_key,
                                source: anyhow!(e).context("reading request byte stream"),
                            },
                        );
                    }
                }
            }
            let data = buf.freeze();

            let temp_key = keys::temp_key();
            let final_key = keys::final_key(&resource, &display_name);
            let content_type = mime_guess::from_path(&display_name)
                .first_or_octet_stream()
                .to_string();

            if let Err(e) = with_deadline(
                deadline,
                timeout,
                "put staged object",
                store.put(&temp_key, data, &content_type, attachment_tags(&attachment_key)),
            )
            .await
            {
                return StageResult::failed(Some(temp_key), upload_failed(&attachment_key, e));
            }

            // Authoritative metadata comes from a read after the write;
            // upload responses are not trusted for size or hash.
            let meta = match with_deadline(
                deadline,
                timeout,
                "head staged object",
                store.head(&temp_key),
            )
            .await
            {
                Ok(meta) => meta,
                Err(e) => {
                    return StageResult::failed(Some(temp_key), upload_failed(&attachment_key, e));
                }
            };

            debug!(
                attachment_key = %attachment_key,
                temp_key = %temp_key,
                size = meta.size,
                "intent staged"
            );

            StageResult::ok(bare(
                Some(StagedObject {
                    temp_key,
                    final_key,
                    size: meta.size,
                    etag: meta.etag,
                    content_type: meta.content_type,
                }),
                false,
            ))
        }

        IntentSource::CopyReference { href, best_effort } => {
            let Some((source_resource, source_filename)) = keys::key_from_href(&href) else {
                return StageResult::failed(None, PipelineError::CopySourceNotFound { href });
            };
            let source_key = keys::final_key(&source_resource, &source_filename);

            let source_meta = match with_deadline(
                deadline,
                timeout,
                "head copy source",
                store.head(&source_key),
            )
            .await
            {
                Ok(meta) => meta,
                Err(StoreError::NotFound(_)) if best_effort => {
                    debug!(href = %href, "best-effort copy source missing, skipping intent");
                    return StageResult::ok(bare(None, true));
                }
                Err(StoreError::NotFound(_)) => {
                    return StageResult::failed(None, PipelineError::CopySourceNotFound { href });
                }
                Err(e) => {
                    return StageResult::failed(None, upload_failed(&attachment_key, e));
                }
            };

            let temp_key = keys::temp_key();
            let final_key = keys::final_key(&resource, &display_name);

            // Server-side copy: bytes never transit the pipeline.
            if let Err(e) = with_deadline(
                deadline,
                timeout,
                "copy to staging",
                store.copy(&source_key, &temp_key, attachment_tags(&attachment_key)),
            )
            .await
            {
                return StageResult::failed(Some(temp_key), upload_failed(&attachment_key, e));
            }

            StageResult::ok(bare(
                Some(StagedObject {
                    temp_key,
                    final_key,
                    size: source_meta.size,
                    etag: source_meta.etag,
                    content_type: source_meta.content_type,
                }),
                false,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attache_core::ResourceRef;
    use attache_store::MemoryStore;
    use bytes::Bytes;
    use serde_json::Map;

    use crate::intent::byte_stream_from;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn raw_intent(key: &str, resource: &str, filename: &str, data: &'static str) -> AttachmentIntent {
        AttachmentIntent {
            attachment_key: key.into(),
            resource: ResourceRef::new(resource),
            filename: Some(filename.into()),
            metadata: Map::new(),
            source: IntentSource::RawBytes(byte_stream_from(Bytes::from(data))),
        }
    }

    #[tokio::test]
    async fn test_stage_raw_bytes() {
        let store = MemoryStore::new();
        let result = stage_intent(&store, raw_intent("k1", "r1", "a.txt", "hello"), TIMEOUT, None).await;

        assert!(result.error.is_none());
        let item = result.item.unwrap();
        let staged = item.staged.unwrap();
        assert!(staged.temp_key.starts_with(keys::TEMP_PREFIX));
        assert_eq!(staged.final_key, "r1-a.txt");
        assert_eq!(staged.size, 5);
        assert_eq!(staged.content_type, "text/plain");

        // staged under the temp key only, final untouched
        assert!(store.head(&staged.temp_key).await.is_ok());
        assert!(store.head("r1-a.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_stage_nofile_touches_nothing() {
        let store = MemoryStore::new();
        let intent = AttachmentIntent {
            attachment_key: "k1".into(),
            resource: ResourceRef::new("r1"),
            filename: Some("a.txt".into()),
            metadata: Map::new(),
            source: IntentSource::NoFile,
        };
        let result = stage_intent(&store, intent, TIMEOUT, None).await;

        let item = result.item.unwrap();
        assert!(item.staged.is_none());
        assert!(!item.skipped);
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_stage_copy_reference() {
        let store = MemoryStore::new();
        store
            .put(
                "r1-src.txt",
                Bytes::from("copy me"),
                "text/plain",
                attachment_tags("orig"),
            )
            .await
            .unwrap();

        let intent = AttachmentIntent {
            attachment_key: "k2".into(),
            resource: ResourceRef::new("r2"),
            filename: Some("src.txt".into()),
            metadata: Map::new(),
            source: IntentSource::CopyReference {
                href: "/resources/r1/attachments/src.txt".into(),
                best_effort: false,
            },
        };
        let result = stage_intent(&store, intent, TIMEOUT, None).await;

        assert!(result.error.is_none());
        let staged = result.item.unwrap().staged.unwrap();
        assert_eq!(staged.final_key, "r2-src.txt");
        assert_eq!(staged.size, 7);

        // the temp copy is tagged with the new identity
        let meta = store.head(&staged.temp_key).await.unwrap();
        assert_eq!(meta.attachment_key(), Some("k2"));
    }

    #[tokio::test]
    async fn test_copy_source_missing_fails_batch() {
        let store = MemoryStore::new();
        let intent = AttachmentIntent {
            attachment_key: "k1".into(),
            resource: ResourceRef::new("r2"),
            filename: Some("gone.txt".into()),
            metadata: Map::new(),
            source: IntentSource::CopyReference {
                href: "/resources/r1/attachments/gone.txt".into(),
                best_effort: false,
            },
        };
        let result = stage_intent(&store, intent, TIMEOUT, None).await;
        assert_eq!(
            result.error.as_ref().map(|e| e.code()),
            Some("copy_source_not_found")
        );
    }

    #[tokio::test]
    async fn test_copy_source_missing_best_effort_skips() {
        let store = MemoryStore::new();
        let intent = AttachmentIntent {
            attachment_key: "k1".into(),
            resource: ResourceRef::new("r2"),
            filename: Some("gone.txt".into()),
            metadata: Map::new(),
            source: IntentSource::CopyReference {
                href: "/resources/r1/attachments/gone.txt".into(),
                best_effort: true,
            },
        };
        let result = stage_intent(&store, intent, TIMEOUT, None).await;

        assert!(result.error.is_none());
        let item = result.item.unwrap();
        assert!(item.skipped);
        assert!(item.staged.is_none());
    }

    #[tokio::test]
    async fn test_malformed_copy_href_rejected() {
        let store = MemoryStore::new();
        let intent = AttachmentIntent {
            attachment_key: "k1".into(),
            resource: ResourceRef::new("r2"),
            filename: Some("a.txt".into()),
            metadata: Map::new(),
            source: IntentSource::CopyReference {
                href: "not-an-href".into(),
                best_effort: false,
            },
        };
        let result = stage_intent(&store, intent, TIMEOUT, None).await;
        assert_eq!(
            result.error.as_ref().map(|e| e.code()),
            Some("copy_source_not_found")
        );
    }

    #[tokio::test]
    async fn test_stream_error_fails_intent() {
        let store = MemoryStore::new();
        let broken: crate::intent::ByteStream = futures::stream::iter([
            Ok(Bytes::from("partial")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client gone")),
        ])
        .boxed();

        let intent = AttachmentIntent {
            attachment_key: "k1".into(),
            resource: ResourceRef::new("r1"),
            filename: Some("a.txt".into()),
            metadata: Map::new(),
            source: IntentSource::RawBytes(broken),
        };
        let result = stage_intent(&store, intent, TIMEOUT, None).await;

        assert_eq!(result.error.as_ref().map(|e| e.code()), Some("upload_failed"));
        // nothing was written
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_expired_deadline_is_a_per_intent_failure() {
        let store = MemoryStore::new();
        let past = Instant::now() - Duration::from_millis(1);
        let result = stage_intent(
            &store,
            raw_intent("k1", "r1", "a.txt", "hello"),
            TIMEOUT,
            Some(past),
        )
        .await;

        assert_eq!(result.error.as_ref().map(|e| e.code()), Some("upload_failed"));
    }
}
