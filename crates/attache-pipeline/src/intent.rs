//! Batch data model
//!
//! The value types flowing through the pipeline: wire-level intent specs,
//! validated [`AttachmentIntent`]s, staged objects, the [`UploadBatch`]
//! state machine, and per-intent outcomes. A batch is the unit of
//! atomicity for one client request; nothing here persists across
//! requests.

use std::collections::HashMap;

use attache_core::{PipelineError, PipelineResult, ResourceRef};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::keys;

/// A raw byte stream as delivered by the request layer.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Wrap an in-memory buffer as a [`ByteStream`].
pub fn byte_stream_from(data: Bytes) -> ByteStream {
    futures::stream::iter([Ok(data)]).boxed()
}

/// Where an intent's content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    /// New bytes uploaded with the request.
    RawBytes,
    /// Server-side copy of an existing attachment.
    CopyReference,
    /// Metadata-only entry; no object is staged.
    NoFile,
}

/// One attachment intent as parsed from the request body.
///
/// `kind` may be omitted, in which case it is inferred: a `sourceHref`
/// means a copy, a matching raw file means an upload, neither means
/// metadata-only. A declared kind that contradicts what was actually
/// received is a [`PipelineError::FileIntentMismatch`].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntentSpec {
    pub attachment_key: Option<String>,
    pub resource: Option<String>,
    pub kind: Option<SourceKind>,
    pub filename: Option<String>,
    pub source_href: Option<String>,
    pub best_effort: bool,
    pub metadata: Map<String, Value>,
}

impl IntentSpec {
    pub fn new(attachment_key: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            attachment_key: Some(attachment_key.into()),
            resource: Some(resource.into()),
            ..Default::default()
        }
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn copy_from(mut self, href: impl Into<String>) -> Self {
        self.source_href = Some(href.into());
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    pub fn kind(mut self, kind: SourceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn metadata_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A validated attachment intent, ready for staging.
#[derive(Debug)]
pub struct AttachmentIntent {
    pub attachment_key: String,
    pub resource: ResourceRef,
    pub filename: Option<String>,
    pub metadata: Map<String, Value>,
    pub source: IntentSource,
}

/// Validated counterpart of [`SourceKind`], carrying the content itself.
pub enum IntentSource {
    RawBytes(ByteStream),
    CopyReference { href: String, best_effort: bool },
    NoFile,
}

impl IntentSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::RawBytes(_) => SourceKind::RawBytes,
            Self::CopyReference { .. } => SourceKind::CopyReference,
            Self::NoFile => SourceKind::NoFile,
        }
    }
}

impl std::fmt::Debug for IntentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RawBytes(_) => f.write_str("RawBytes(..)"),
            Self::CopyReference { href, best_effort } => f
                .debug_struct("CopyReference")
                .field("href", href)
                .field("best_effort", best_effort)
                .finish(),
            Self::NoFile => f.write_str("NoFile"),
        }
    }
}

/// One client request: intent specs plus the raw byte streams keyed by
/// attachment identity, and an optional deadline applied to every store
/// call made on the batch's behalf.
pub struct UploadRequest {
    pub intents: Vec<IntentSpec>,
    pub files: HashMap<String, ByteStream>,
    pub deadline: Option<tokio::time::Instant>,
}

impl UploadRequest {
    pub fn new(intents: Vec<IntentSpec>) -> Self {
        Self {
            intents,
            files: HashMap::new(),
            deadline: None,
        }
    }

    pub fn with_file(mut self, attachment_key: impl Into<String>, stream: ByteStream) -> Self {
        self.files.insert(attachment_key.into(), stream);
        self
    }

    pub fn with_bytes(self, attachment_key: impl Into<String>, data: Bytes) -> Self {
        self.with_file(attachment_key, byte_stream_from(data))
    }

    pub fn with_deadline(mut self, deadline: tokio::time::Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Cross-validate intents against received files and produce validated
    /// intents. Runs before any store mutation; every error here aborts
    /// the request with no cleanup needed.
    pub fn into_intents(self) -> PipelineResult<Vec<AttachmentIntent>> {
        let UploadRequest {
            intents: specs,
            mut files,
            ..
        } = self;

        if specs.is_empty() {
            return Err(PipelineError::MissingBody);
        }

        let mut seen: Vec<(ResourceRef, String)> = Vec::with_capacity(specs.len());
        let mut intents = Vec::with_capacity(specs.len());

        for spec in specs {
            let attachment_key = match spec.attachment_key {
                Some(k) if !k.is_empty() => k,
                _ => return Err(PipelineError::MissingAttachmentIdentity),
            };
            let resource = match spec.resource {
                Some(r) if !r.is_empty() => ResourceRef::new(r),
                _ => {
                    return Err(PipelineError::MissingResourceReference { attachment_key });
                }
            };

            if seen.contains(&(resource.clone(), attachment_key.clone())) {
                return Err(PipelineError::FileIntentMismatch {
                    detail: format!(
                        "duplicate attachment key {} for resource {}",
                        attachment_key, resource
                    ),
                });
            }
            seen.push((resource.clone(), attachment_key.clone()));

            // An empty filename is as useless as a missing one.
            let filename = spec.filename.filter(|f| !f.is_empty());

            let file = files.remove(&attachment_key);
            let has_file = file.is_some();
            let has_href = spec.source_href.is_some();

            // Never guess between two supplied sources.
            if has_file && has_href {
                return Err(PipelineError::MixedCopyAndUpload { attachment_key });
            }

            let kind = spec.kind.unwrap_or(match (has_file, has_href) {
                (true, _) => SourceKind::RawBytes,
                (_, true) => SourceKind::CopyReference,
                _ => SourceKind::NoFile,
            });

            let source = match kind {
                SourceKind::RawBytes => match file {
                    Some(stream) => IntentSource::RawBytes(stream),
                    None => {
                        return Err(PipelineError::FileIntentMismatch {
                            detail: format!("no file received for intent {}", attachment_key),
                        });
                    }
                },
                SourceKind::CopyReference => match spec.source_href {
                    Some(href) => IntentSource::CopyReference {
                        href,
                        best_effort: spec.best_effort,
                    },
                    None => {
                        return Err(PipelineError::FileIntentMismatch {
                            detail: format!(
                                "copy intent {} has no source href",
                                attachment_key
                            ),
                        });
                    }
                },
                SourceKind::NoFile => {
                    if has_file {
                        return Err(PipelineError::FileIntentMismatch {
                            detail: format!(
                                "file received for metadata-only intent {}",
                                attachment_key
                            ),
                        });
                    }
                    if has_href {
                        return Err(PipelineError::FileIntentMismatch {
                            detail: format!(
                                "source href supplied for metadata-only intent {}",
                                attachment_key
                            ),
                        });
                    }
                    IntentSource::NoFile
                }
            };

            // Filename is required unless the metadata carries one for a
            // metadata-only entry.
            let has_external_name = source.kind() == SourceKind::NoFile
                && spec
                    .metadata
                    .get("fileName")
                    .and_then(Value::as_str)
                    .is_some_and(|s| !s.is_empty());
            if filename.is_none() && !has_external_name {
                return Err(PipelineError::FileIntentMismatch {
                    detail: format!("intent {} is missing a filename", attachment_key),
                });
            }

            intents.push(AttachmentIntent {
                attachment_key,
                resource,
                filename,
                metadata: spec.metadata,
                source,
            });
        }

        if let Some(orphan) = files.keys().next() {
            return Err(PipelineError::FileIntentMismatch {
                detail: format!("file {} has no matching intent", orphan),
            });
        }

        Ok(intents)
    }
}

/// An object staged under a temporary key, with authoritative metadata
/// from the post-write read. Owned by the batch that created it and
/// destroyed by promotion or rollback.
#[derive(Debug, Clone)]
pub struct StagedObject {
    pub temp_key: String,
    pub final_key: String,
    pub size: u64,
    pub etag: String,
    pub content_type: String,
}

/// One intent after staging, as seen by hooks and the orchestrator.
#[derive(Debug, Clone)]
pub struct StagedItem {
    pub attachment_key: String,
    pub resource: ResourceRef,
    pub filename: Option<String>,
    pub kind: SourceKind,
    pub metadata: Map<String, Value>,
    pub staged: Option<StagedObject>,
    /// A best-effort copy whose source was missing: nothing staged,
    /// per-item hooks are not invoked, outcome is `Skipped`.
    pub skipped: bool,
}

impl StagedItem {
    /// The user-visible filename: the intent's own, or the externally
    /// supplied one from the metadata map for metadata-only entries.
    pub fn display_name(&self) -> Option<&str> {
        self.filename
            .as_deref()
            .or_else(|| self.metadata.get("fileName").and_then(Value::as_str))
    }

    pub fn href(&self) -> Option<String> {
        self.display_name()
            .map(|name| keys::href_for(&self.resource, name))
    }
}

/// Batch lifecycle states. Transitions are monotonic; no state is ever
/// revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Staging,
    Validating,
    Committing,
    Committed,
    RollingBack,
    Failed,
}

impl BatchState {
    fn rank(self) -> u8 {
        match self {
            Self::Staging => 0,
            Self::Validating => 1,
            Self::Committing => 2,
            Self::Committed => 3,
            Self::RollingBack => 4,
            Self::Failed => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Failed)
    }
}

/// The unit of atomicity: one client request's staged items plus the
/// state machine driving promote/rollback.
pub struct UploadBatch {
    pub items: Vec<StagedItem>,
    state: BatchState,
    pub first_error: Option<PipelineError>,
    temp_keys: Vec<String>,
}

impl Default for UploadBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadBatch {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            state: BatchState::Staging,
            first_error: None,
            temp_keys: Vec::new(),
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Advance the state machine. Transitions only move forward.
    pub fn advance(&mut self, next: BatchState) {
        debug_assert!(!self.state.is_terminal(), "transition out of terminal state");
        debug_assert!(next.rank() > self.state.rank(), "state machine moved backwards");
        debug!(from = ?self.state, to = ?next, "batch state transition");
        self.state = next;
    }

    /// Record a temporary key so rollback can find it even when the
    /// staging task that created it failed later on.
    pub fn record_temp_key(&mut self, key: String) {
        self.temp_keys.push(key);
    }

    pub fn temp_keys(&self) -> &[String] {
        &self.temp_keys
    }

    /// Capture an error; only the first one is kept and surfaced.
    pub fn fail(&mut self, error: PipelineError) {
        if self.first_error.is_none() {
            self.first_error = Some(error);
        }
    }
}

/// Per-intent result status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutcomeStatus {
    /// New bytes uploaded and promoted.
    Created,
    /// Server-side copy promoted.
    Copied,
    /// Metadata-only entry; hooks ran, nothing stored.
    Registered,
    /// Best-effort copy whose source was missing.
    Skipped,
}

/// Per-intent result returned for a committed batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    pub attachment_key: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

impl UploadOutcome {
    pub(crate) fn for_item(item: &StagedItem) -> Self {
        let status = if item.skipped {
            OutcomeStatus::Skipped
        } else {
            match item.kind {
                SourceKind::RawBytes => OutcomeStatus::Created,
                SourceKind::CopyReference => OutcomeStatus::Copied,
                SourceKind::NoFile => OutcomeStatus::Registered,
            }
        };
        Self {
            attachment_key: item.attachment_key.clone(),
            status,
            href: if item.skipped { None } else { item.href() },
        }
    }
}

/// A one-time credential naming a reserved final key, for clients that
/// upload directly to the store. Issuing one touches nothing in the store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCredential {
    pub token: uuid::Uuid,
    pub key: String,
    pub filename: String,
    pub issued_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(specs: Vec<IntentSpec>) -> UploadRequest {
        UploadRequest::new(specs)
    }

    #[test]
    fn test_empty_batch_rejected() {
        let err = request(vec![]).into_intents().unwrap_err();
        assert_eq!(err.code(), "missing_body");
    }

    #[test]
    fn test_missing_identity_rejected() {
        let spec = IntentSpec {
            resource: Some("r1".into()),
            filename: Some("a.txt".into()),
            ..Default::default()
        };
        let err = request(vec![spec]).into_intents().unwrap_err();
        assert_eq!(err.code(), "missing_attachment_identity");
    }

    #[test]
    fn test_missing_resource_rejected() {
        let spec = IntentSpec {
            attachment_key: Some("k1".into()),
            filename: Some("a.txt".into()),
            ..Default::default()
        };
        let err = request(vec![spec]).into_intents().unwrap_err();
        assert_eq!(err.code(), "missing_resource_reference");
    }

    #[test]
    fn test_mixed_copy_and_upload_rejected() {
        let spec = IntentSpec::new("k1", "r1")
            .filename("a.txt")
            .copy_from("/resources/r2/attachments/a.txt");
        let err = request(vec![spec])
            .with_bytes("k1", Bytes::from("data"))
            .into_intents()
            .unwrap_err();
        assert_eq!(err.code(), "mixed_copy_and_upload");
    }

    #[test]
    fn test_file_without_intent_rejected() {
        let spec = IntentSpec::new("k1", "r1").filename("a.txt");
        let err = request(vec![spec])
            .with_bytes("k1", Bytes::from("data"))
            .with_bytes("stray", Bytes::from("data"))
            .into_intents()
            .unwrap_err();
        assert_eq!(err.code(), "file_intent_mismatch");
    }

    #[test]
    fn test_declared_raw_bytes_without_file_rejected() {
        let spec = IntentSpec::new("k1", "r1")
            .filename("a.txt")
            .kind(SourceKind::RawBytes);
        let err = request(vec![spec]).into_intents().unwrap_err();
        assert_eq!(err.code(), "file_intent_mismatch");
    }

    #[test]
    fn test_declared_no_file_with_source_href_rejected() {
        let spec = IntentSpec::new("k1", "r1")
            .filename("a.txt")
            .copy_from("/resources/r2/attachments/a.txt")
            .kind(SourceKind::NoFile);
        let err = request(vec![spec]).into_intents().unwrap_err();
        assert_eq!(err.code(), "file_intent_mismatch");
    }

    #[test]
    fn test_empty_filename_rejected() {
        let spec = IntentSpec::new("k1", "r1").filename("");
        let err = request(vec![spec]).into_intents().unwrap_err();
        assert_eq!(err.code(), "file_intent_mismatch");
    }

    #[test]
    fn test_empty_external_name_rejected() {
        let spec = IntentSpec::new("k1", "r1")
            .metadata_entry("fileName", Value::String("".into()));
        let err = request(vec![spec]).into_intents().unwrap_err();
        assert_eq!(err.code(), "file_intent_mismatch");
    }

    #[test]
    fn test_intent_debug_redacts_stream() {
        let spec = IntentSpec::new("k1", "r1").filename("a.txt");
        let intents = request(vec![spec])
            .with_bytes("k1", Bytes::from("data"))
            .into_intents()
            .unwrap();
        let rendered = format!("{:?}", intents[0]);
        assert!(rendered.contains("RawBytes(..)"));
        assert!(!rendered.contains("data"));
    }

    #[test]
    fn test_duplicate_key_same_resource_rejected() {
        let specs = vec![
            IntentSpec::new("k1", "r1").filename("a.txt"),
            IntentSpec::new("k1", "r1").filename("b.txt"),
        ];
        let err = request(specs)
            .with_bytes("k1", Bytes::from("data"))
            .into_intents()
            .unwrap_err();
        assert_eq!(err.code(), "file_intent_mismatch");
    }

    #[test]
    fn test_kind_inference() {
        let specs = vec![
            IntentSpec::new("up", "r1").filename("a.txt"),
            IntentSpec::new("cp", "r1")
                .filename("b.txt")
                .copy_from("/resources/r2/attachments/b.txt"),
            IntentSpec::new("meta", "r1").filename("c.txt"),
        ];
        let intents = request(specs)
            .with_bytes("up", Bytes::from("data"))
            .into_intents()
            .unwrap();

        assert_eq!(intents[0].source.kind(), SourceKind::RawBytes);
        assert_eq!(intents[1].source.kind(), SourceKind::CopyReference);
        assert_eq!(intents[2].source.kind(), SourceKind::NoFile);
    }

    #[test]
    fn test_no_file_with_external_name_allowed() {
        let spec = IntentSpec::new("k1", "r1")
            .metadata_entry("fileName", Value::String("ext.txt".into()));
        let intents = request(vec![spec]).into_intents().unwrap();
        assert_eq!(intents[0].filename, None);
        assert_eq!(
            intents[0].metadata.get("fileName").and_then(Value::as_str),
            Some("ext.txt")
        );
    }

    #[test]
    fn test_no_file_without_any_name_rejected() {
        let spec = IntentSpec::new("k1", "r1");
        let err = request(vec![spec]).into_intents().unwrap_err();
        assert_eq!(err.code(), "file_intent_mismatch");
    }

    #[test]
    fn test_batch_state_machine_happy_path() {
        let mut batch = UploadBatch::new();
        assert_eq!(batch.state(), BatchState::Staging);
        batch.advance(BatchState::Validating);
        batch.advance(BatchState::Committing);
        batch.advance(BatchState::Committed);
        assert!(batch.state().is_terminal());
    }

    #[test]
    fn test_batch_keeps_first_error() {
        let mut batch = UploadBatch::new();
        batch.fail(PipelineError::MissingBody);
        batch.fail(PipelineError::MissingAttachmentIdentity);
        assert_eq!(batch.first_error.as_ref().map(|e| e.code()), Some("missing_body"));
    }

    #[test]
    #[should_panic]
    fn test_batch_state_never_moves_backwards() {
        let mut batch = UploadBatch::new();
        batch.advance(BatchState::Committing);
        batch.advance(BatchState::Validating);
    }

    #[test]
    fn test_outcome_for_skipped_item() {
        let item = StagedItem {
            attachment_key: "k".into(),
            resource: ResourceRef::new("r1"),
            filename: Some("a.txt".into()),
            kind: SourceKind::CopyReference,
            metadata: Map::new(),
            staged: None,
            skipped: true,
        };
        let outcome = UploadOutcome::for_item(&item);
        assert_eq!(outcome.status, OutcomeStatus::Skipped);
        assert_eq!(outcome.href, None);
    }
}
