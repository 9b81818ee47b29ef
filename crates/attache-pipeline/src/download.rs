//! Download streaming
//!
//! Resolves the requested filename through the same canonicalization as
//! upload, with a one-shot fallback to the raw filename for objects stored
//! before canonicalization was introduced. The body is streamed chunk by
//! chunk into the caller's sink; a sink closed by its consumer mid-body is
//! surfaced as a distinct cancellation condition, never as success or a
//! hang.

use std::time::Duration;

use attache_core::{PipelineError, PipelineResult, ResourceRef};
use attache_store::{ObjectBody, ObjectMeta, ObjectStore, StoreError};
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::debug;

use crate::keys;
use crate::stage::with_deadline;

/// Resolve a requested filename to the store key actually holding it.
///
/// Canonical key first; on 404, one retry with the uncanonicalized raw
/// filename; only then not-found.
pub(crate) async fn resolve(
    store: &dyn ObjectStore,
    resource: &ResourceRef,
    filename: &str,
    timeout: Duration,
    deadline: Option<Instant>,
) -> PipelineResult<(String, ObjectMeta)> {
    let canonical = keys::final_key(resource, filename);

    match with_deadline(deadline, timeout, "head download", store.head(&canonical)).await {
        Ok(meta) => return Ok((canonical, meta)),
        Err(StoreError::NotFound(_)) => {}
        Err(e) => return Err(download_failed(filename, e)),
    }

    let legacy = keys::legacy_key(resource, filename);
    if legacy != canonical {
        match with_deadline(deadline, timeout, "head legacy download", store.head(&legacy)).await {
            Ok(meta) => {
                debug!(key = %legacy, "resolved via legacy raw filename");
                return Ok((legacy, meta));
            }
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(download_failed(filename, e)),
        }
    }

    Err(PipelineError::DownloadNotFound {
        filename: filename.to_string(),
    })
}

fn download_failed(filename: &str, err: StoreError) -> PipelineError {
    PipelineError::DownloadFailed {
        filename: filename.to_string(),
        source: anyhow::Error::new(err),
    }
}

/// Drain an object body into the sink, returning the bytes written.
pub(crate) async fn stream_to_sink<W>(
    mut body: ObjectBody,
    sink: &mut W,
    filename: &str,
) -> PipelineResult<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;

    while let Some(chunk) = body.stream.next().await {
        let chunk = chunk.map_err(|e| download_failed(filename, e))?;
        // A write failure means the consumer closed the sink; surface it
        // as cancellation so the caller can release resources.
        if sink.write_all(&chunk).await.is_err() {
            return Err(PipelineError::DownloadCancelled {
                filename: filename.to_string(),
            });
        }
        written += chunk.len() as u64;
    }

    if sink.flush().await.is_err() {
        return Err(PipelineError::DownloadCancelled {
            filename: filename.to_string(),
        });
    }

    Ok(written)
}
