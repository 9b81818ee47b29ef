//! # attache-pipeline
//!
//! Batch attachment staging and commit for Attache.
//!
//! ## Features
//!
//! - Filename canonicalization shared by upload and download
//! - Temp-key staging with all-or-nothing promotion per batch
//! - Conflict detection via the `attachmentkey` object tag
//! - Caller-supplied validation hooks with three scheduling strategies
//! - Download streaming with a legacy raw-filename fallback
//!
//! ## Example
//!
//! ```rust,ignore
//! use attache_pipeline::{AttachmentPipeline, IntentSpec, UploadRequest};
//! use attache_store::MemoryStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let pipeline = AttachmentPipeline::new(store, Default::default());
//!
//! let request = UploadRequest::new(vec![
//!     IntentSpec::new("attachment-1", "work-package-42").filename("report.pdf"),
//! ])
//! .with_bytes("attachment-1", bytes::Bytes::from(file_data));
//!
//! let outcomes = pipeline.upload(request).await?;
//! ```

mod batch;
mod conflict;
mod download;
pub mod filename;
pub mod hooks;
pub mod intent;
pub mod keys;
mod service;
mod stage;

pub use hooks::{AttachmentHook, NoopHook};
pub use intent::{
    byte_stream_from, AttachmentIntent, BatchState, ByteStream, IntentSource, IntentSpec,
    OutcomeStatus, SourceKind, StagedItem, StagedObject, UploadBatch, UploadCredential,
    UploadOutcome, UploadRequest,
};
pub use service::AttachmentPipeline;
