//! Promotion and rollback
//!
//! The store offers no cross-key transactions, so the orchestrator relies
//! on compensating actions: promotion copies each staged object from its
//! temporary key to its final key and deletes the temp; rollback deletes
//! every temporary key the batch created. Both are scatter-then-join: a
//! slow or failing item never blocks another item's store call, but the
//! batch does not change state until every call has finished.

use std::time::Duration;

use attache_core::{PipelineError, PipelineResult};
use attache_store::{attachment_tags, ObjectStore};
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::intent::{StagedItem, UploadBatch};
use crate::stage::with_deadline;

async fn promote_item(
    store: &dyn ObjectStore,
    item: &StagedItem,
    timeout: Duration,
    deadline: Option<Instant>,
) -> PipelineResult<()> {
    let Some(staged) = &item.staged else {
        return Ok(());
    };

    with_deadline(
        deadline,
        timeout,
        "promote to final key",
        store.copy(
            &staged.temp_key,
            &staged.final_key,
            attachment_tags(&item.attachment_key),
        ),
    )
    .await
    .map_err(|e| PipelineError::UploadFailed {
        attachment_key: item.attachment_key.clone(),
        source: anyhow::Error::new(e),
    })?;

    // The temp is spent once the final exists; losing this delete leaks a
    // temp object but cannot affect correctness.
    if let Err(e) = with_deadline(
        deadline,
        timeout,
        "delete promoted temp key",
        store.delete(&staged.temp_key),
    )
    .await
    {
        warn!(
            temp_key = %staged.temp_key,
            error = %e,
            "failed to delete temp key after promotion"
        );
    }

    debug!(
        attachment_key = %item.attachment_key,
        final_key = %staged.final_key,
        "staged object promoted"
    );
    Ok(())
}

/// Promote every staged object to its final key. Only called once the
/// whole batch has passed validation and hooks; this is the first point
/// at which any final key is written.
pub(crate) async fn promote(
    store: &dyn ObjectStore,
    items: &[StagedItem],
    timeout: Duration,
    deadline: Option<Instant>,
) -> PipelineResult<()> {
    let results = join_all(
        items
            .iter()
            .map(|item| promote_item(store, item, timeout, deadline)),
    )
    .await;

    results.into_iter().collect()
}

/// Delete every temporary key the batch created, best-effort. Secondary
/// failures are logged and never escalated: they would otherwise mask the
/// original error. Uses fresh per-call timeouts rather than the request
/// deadline, which may already have expired when rollback runs.
pub(crate) async fn rollback(store: &dyn ObjectStore, batch: &UploadBatch, timeout: Duration) {
    let results = join_all(batch.temp_keys().iter().map(|key| async move {
        (
            key,
            with_deadline(None, timeout, "rollback temp key", store.delete(key)).await,
        )
    }))
    .await;

    let mut failed = 0usize;
    for (key, result) in results {
        if let Err(e) = result {
            failed += 1;
            warn!(
                code = "rollback_partial_failure",
                temp_key = %key,
                error = %e,
                "failed to delete temp key during rollback"
            );
        }
    }

    debug!(
        temp_keys = batch.temp_keys().len(),
        failed, "batch rolled back"
    );
}
