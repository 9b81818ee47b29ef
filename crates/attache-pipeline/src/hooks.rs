//! Hook runner
//!
//! Callers validate and persist attachment metadata through a hook invoked
//! once the staged data is ready. The scheduling strategy is a deployment
//! choice ([`HookStrategy`]); the pipeline imposes no other ordering on
//! hooks. Hook failures are opaque: whatever error the hook returns is
//! captured verbatim and routed through rollback exactly like a staging
//! failure.
//!
//! Per-item strategies receive each non-skipped item; the whole-batch hook
//! receives the full list (including skipped items, which carry a flag)
//! and owns whatever atomicity it wants across them.

use async_trait::async_trait;
use attache_core::{HookStrategy, PipelineError, PipelineResult};
use futures::future::join_all;
use tracing::debug;

use crate::intent::StagedItem;

/// Caller-supplied validation/persistence hook.
#[async_trait]
pub trait AttachmentHook: Send + Sync {
    /// Invoked once per staged intent under the per-item strategies.
    async fn on_item(&self, item: &StagedItem) -> anyhow::Result<()>;

    /// Invoked once with the whole batch under [`HookStrategy::WholeBatch`].
    /// Defaults to calling [`Self::on_item`] for each non-skipped item.
    async fn on_batch(&self, items: &[StagedItem]) -> anyhow::Result<()> {
        for item in items.iter().filter(|i| !i.skipped) {
            self.on_item(item).await?;
        }
        Ok(())
    }
}

/// Hook that accepts everything. The default when the embedder persists
/// metadata elsewhere.
pub struct NoopHook;

#[async_trait]
impl AttachmentHook for NoopHook {
    async fn on_item(&self, _item: &StagedItem) -> anyhow::Result<()> {
        Ok(())
    }
}

fn hook_failed(source: anyhow::Error) -> PipelineError {
    PipelineError::HookFailed { source }
}

/// Run the configured hook over a staged batch.
pub(crate) async fn run(
    hook: &dyn AttachmentHook,
    strategy: HookStrategy,
    items: &[StagedItem],
) -> PipelineResult<()> {
    match strategy {
        HookStrategy::PerItemSequential => {
            // Submission order; the first failure stops further
            // invocations. Unprocessed intents are simply not attempted.
            for item in items.iter().filter(|i| !i.skipped) {
                hook.on_item(item).await.map_err(hook_failed)?;
            }
            Ok(())
        }
        HookStrategy::PerItemConcurrent => {
            // Every invocation runs; all are drained before results are
            // inspected, so no hook is left in flight when the
            // orchestrator moves on to promote or roll back.
            let active: Vec<&StagedItem> = items.iter().filter(|i| !i.skipped).collect();
            let results = join_all(active.iter().map(|item| hook.on_item(item))).await;
            debug!(invocations = results.len(), "concurrent hooks drained");
            results
                .into_iter()
                .collect::<anyhow::Result<()>>()
                .map_err(hook_failed)
        }
        HookStrategy::WholeBatch => hook.on_batch(items).await.map_err(hook_failed),
    }
}
