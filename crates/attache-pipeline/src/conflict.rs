//! Conflict detection
//!
//! Filename uniqueness per resource is enforced through the
//! `attachmentkey` tag on final objects: an occupied final key is only a
//! conflict when it was written by a *different* attachment identity.
//! Runs after staging (read-after-your-own-write) and before hooks, so a
//! hook never observes a batch that is already doomed to be rejected.

use std::time::Duration;

use attache_core::{PipelineError, PipelineResult};
use attache_store::{ObjectStore, StoreError};
use futures::future::join_all;
use tokio::time::Instant;
use tracing::debug;

use crate::intent::StagedItem;
use crate::stage::with_deadline;

async fn check_item(
    store: &dyn ObjectStore,
    item: &StagedItem,
    timeout: Duration,
    deadline: Option<Instant>,
) -> PipelineResult<()> {
    let Some(staged) = &item.staged else {
        // Metadata-only and skipped intents claim no final key.
        return Ok(());
    };

    match with_deadline(
        deadline,
        timeout,
        "head final key",
        store.head(&staged.final_key),
    )
    .await
    {
        // Nothing there yet.
        Err(StoreError::NotFound(_)) => Ok(()),
        // Occupied by the same logical attachment: intentional overwrite.
        Ok(meta) if meta.attachment_key() == Some(item.attachment_key.as_str()) => {
            debug!(
                final_key = %staged.final_key,
                attachment_key = %item.attachment_key,
                "final key occupied by same attachment, will overwrite"
            );
            Ok(())
        }
        Ok(_) => Err(PipelineError::ConflictExistingFile {
            filename: item
                .display_name()
                .unwrap_or(staged.final_key.as_str())
                .to_string(),
        }),
        Err(e) => Err(PipelineError::UploadFailed {
            attachment_key: item.attachment_key.clone(),
            source: anyhow::Error::new(e),
        }),
    }
}

/// Check every staged item's final key. Checks across items run
/// concurrently; the first failure in submission order wins.
pub(crate) async fn check_batch(
    store: &dyn ObjectStore,
    items: &[StagedItem],
    timeout: Duration,
    deadline: Option<Instant>,
) -> PipelineResult<()> {
    let results = join_all(
        items
            .iter()
            .map(|item| check_item(store, item, timeout, deadline)),
    )
    .await;

    results.into_iter().collect()
}
