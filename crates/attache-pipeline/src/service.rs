//! Attachment pipeline service
//!
//! Ties the pieces together for one request: validate → authorize → stage
//! → conflict-check → hooks → promote, with rollback on the first error
//! anywhere past validation. The store client, authorizer, and hook are
//! all injected; the pipeline holds no global state.

use std::sync::Arc;

use attache_core::{actions, Authorizer, AllowAll, PipelineConfig, PipelineError, PipelineResult, ResourceRef};
use attache_store::{ObjectMeta, ObjectStore, StoreError};
use futures::future::join_all;
use tokio::io::AsyncWrite;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::batch;
use crate::conflict;
use crate::download;
use crate::hooks::{self, AttachmentHook, NoopHook};
use crate::intent::{BatchState, UploadBatch, UploadCredential, UploadOutcome, UploadRequest};
use crate::keys;
use crate::stage::{self, with_deadline};

/// The staging-and-commit pipeline for one deployment.
pub struct AttachmentPipeline<S> {
    store: Arc<S>,
    authorizer: Arc<dyn Authorizer>,
    hook: Arc<dyn AttachmentHook>,
    config: PipelineConfig,
}

impl<S: ObjectStore> AttachmentPipeline<S> {
    pub fn new(store: Arc<S>, config: PipelineConfig) -> Self {
        Self {
            store,
            authorizer: Arc::new(AllowAll),
            hook: Arc::new(NoopHook),
            config,
        }
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn AttachmentHook>) -> Self {
        self.hook = hook;
        self
    }

    async fn authorize(&self, action: &str, hrefs: Vec<String>) -> PipelineResult<()> {
        self.authorizer
            .authorize(action, &hrefs)
            .await
            .map_err(|denial| PipelineError::Unauthorized {
                action: denial.action,
                message: denial.message,
            })
    }

    /// Roll the batch back and surface the original error. Cleanup
    /// failures are logged inside [`batch::rollback`] and never replace
    /// `error`.
    async fn abort(&self, mut batch: UploadBatch, error: PipelineError) -> PipelineError {
        warn!(code = error.code(), state = ?batch.state(), "batch failed, rolling back");
        batch.advance(BatchState::RollingBack);
        batch::rollback(self.store.as_ref(), &batch, self.config.store_timeout).await;
        batch.advance(BatchState::Failed);
        error
    }

    /// Process one upload batch: all intents become visible together, or
    /// none do.
    #[instrument(skip(self, request), fields(intents = request.intents.len()))]
    pub async fn upload(&self, request: UploadRequest) -> PipelineResult<Vec<UploadOutcome>> {
        let deadline = request.deadline;
        let timeout = self.config.store_timeout;

        // Validation happens before any store mutation; errors here need
        // no cleanup.
        let intents = request.into_intents()?;

        let mut hrefs: Vec<String> = Vec::new();
        for intent in &intents {
            let href = keys::resource_href(&intent.resource);
            if !hrefs.contains(&href) {
                hrefs.push(href);
            }
        }
        self.authorize(actions::UPLOAD_ATTACHMENTS, hrefs).await?;

        let mut batch = UploadBatch::new();

        // Staging scatters one task per intent and drains them all, so a
        // failing intent never leaves another one's store call in flight.
        let results = join_all(intents.into_iter().map(|intent| {
            stage::stage_intent(self.store.as_ref(), intent, timeout, deadline)
        }))
        .await;

        for result in results {
            if let Some(key) = result.temp_key {
                batch.record_temp_key(key);
            }
            if let Some(item) = result.item {
                batch.items.push(item);
            }
            if let Some(error) = result.error {
                batch.fail(error);
            }
        }
        if let Some(error) = batch.first_error.take() {
            return Err(self.abort(batch, error).await);
        }

        batch.advance(BatchState::Validating);

        if let Err(error) =
            conflict::check_batch(self.store.as_ref(), &batch.items, timeout, deadline).await
        {
            return Err(self.abort(batch, error).await);
        }

        if let Err(error) =
            hooks::run(self.hook.as_ref(), self.config.hook_strategy, &batch.items).await
        {
            return Err(self.abort(batch, error).await);
        }

        batch.advance(BatchState::Committing);

        if let Err(error) =
            batch::promote(self.store.as_ref(), &batch.items, timeout, deadline).await
        {
            return Err(self.abort(batch, error).await);
        }

        batch.advance(BatchState::Committed);
        info!(items = batch.items.len(), "batch committed");

        Ok(batch.items.iter().map(UploadOutcome::for_item).collect())
    }

    /// Stream an attachment into `sink`, returning its metadata so the
    /// request layer can emit headers before the body.
    #[instrument(skip(self, sink), fields(resource = %resource, filename = %filename))]
    pub async fn download<W>(
        &self,
        resource: &ResourceRef,
        filename: &str,
        sink: &mut W,
        deadline: Option<Instant>,
    ) -> PipelineResult<ObjectMeta>
    where
        W: AsyncWrite + Unpin,
    {
        self.authorize(
            actions::VIEW_ATTACHMENTS,
            vec![keys::href_for(resource, filename)],
        )
        .await?;

        let timeout = self.config.store_timeout;
        let (key, meta) =
            download::resolve(self.store.as_ref(), resource, filename, timeout, deadline).await?;

        let body = with_deadline(deadline, timeout, "open download", self.store.get(&key))
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => PipelineError::DownloadNotFound {
                    filename: filename.to_string(),
                },
                e => PipelineError::DownloadFailed {
                    filename: filename.to_string(),
                    source: anyhow::Error::new(e),
                },
            })?;

        let written = download::stream_to_sink(body, sink, filename).await?;
        info!(key = %key, written, "attachment downloaded");
        Ok(meta)
    }

    /// Delete an attachment's final object. Returns whether anything was
    /// there to delete; an absent attachment is not an error.
    #[instrument(skip(self), fields(resource = %resource, filename = %filename))]
    pub async fn delete(
        &self,
        resource: &ResourceRef,
        filename: &str,
        deadline: Option<Instant>,
    ) -> PipelineResult<bool> {
        self.authorize(
            actions::DELETE_ATTACHMENTS,
            vec![keys::href_for(resource, filename)],
        )
        .await?;

        let timeout = self.config.store_timeout;
        let key = match download::resolve(self.store.as_ref(), resource, filename, timeout, deadline)
            .await
        {
            Ok((key, _)) => key,
            Err(PipelineError::DownloadNotFound { .. }) => return Ok(false),
            Err(PipelineError::DownloadFailed { filename, source }) => {
                return Err(PipelineError::DeleteFailed { filename, source });
            }
            Err(e) => return Err(e),
        };

        with_deadline(deadline, timeout, "delete attachment", self.store.delete(&key))
            .await
            .map_err(|e| PipelineError::DeleteFailed {
                filename: filename.to_string(),
                source: anyhow::Error::new(e),
            })?;

        info!(key = %key, "attachment deleted");
        Ok(true)
    }

    /// Issue a one-time credential for a client-side upload. Touches
    /// nothing in the store.
    pub async fn prepare_upload(
        &self,
        resource: &ResourceRef,
        filename: &str,
    ) -> PipelineResult<UploadCredential> {
        self.authorize(
            actions::UPLOAD_ATTACHMENTS,
            vec![keys::resource_href(resource)],
        )
        .await?;

        Ok(UploadCredential {
            token: uuid::Uuid::new_v4(),
            key: keys::final_key(resource, filename),
            filename: filename.to_string(),
            issued_at: chrono::Utc::now(),
        })
    }
}
