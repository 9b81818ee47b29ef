//! Pipeline error taxonomy
//!
//! Every error the pipeline surfaces to a caller carries a stable
//! machine-readable code and an HTTP status mapping. Errors raised after
//! staging has begun are only surfaced once rollback has run.

use thiserror::Error;

/// Errors surfaced by the attachment pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Request contained no attachment intents")]
    MissingBody,

    #[error("Attachment intent is missing its attachment key")]
    MissingAttachmentIdentity,

    #[error("Attachment intent {attachment_key} is missing its resource reference")]
    MissingResourceReference { attachment_key: String },

    #[error("File/intent mismatch: {detail}")]
    FileIntentMismatch { detail: String },

    #[error("Attachment intent {attachment_key} supplies both raw bytes and a copy source")]
    MixedCopyAndUpload { attachment_key: String },

    #[error("File {filename} already exists for this resource under a different attachment")]
    ConflictExistingFile { filename: String },

    #[error("Copy source not found: {href}")]
    CopySourceNotFound { href: String },

    #[error("Upload failed for attachment {attachment_key}: {source}")]
    UploadFailed {
        attachment_key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Attachment hook failed: {source}")]
    HookFailed {
        #[source]
        source: anyhow::Error,
    },

    #[error("Attachment not found: {filename}")]
    DownloadNotFound { filename: String },

    #[error("Download failed for {filename}: {source}")]
    DownloadFailed {
        filename: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Download of {filename} cancelled: output sink closed before the body was drained")]
    DownloadCancelled { filename: String },

    #[error("Delete failed for {filename}: {source}")]
    DeleteFailed {
        filename: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Not allowed to {action}: {message}")]
    Unauthorized { action: String, message: String },
}

/// Standard Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    /// Stable machine-readable code, rendered into HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingBody => "missing_body",
            Self::MissingAttachmentIdentity => "missing_attachment_identity",
            Self::MissingResourceReference { .. } => "missing_resource_reference",
            Self::FileIntentMismatch { .. } => "file_intent_mismatch",
            Self::MixedCopyAndUpload { .. } => "mixed_copy_and_upload",
            Self::ConflictExistingFile { .. } => "conflict_existing_file",
            Self::CopySourceNotFound { .. } => "copy_source_not_found",
            Self::UploadFailed { .. } => "upload_failed",
            Self::HookFailed { .. } => "hook_failed",
            Self::DownloadNotFound { .. } => "download_not_found",
            Self::DownloadFailed { .. } => "download_failed",
            Self::DownloadCancelled { .. } => "download_cancelled",
            Self::DeleteFailed { .. } => "delete_failed",
            Self::Unauthorized { .. } => "unauthorized",
        }
    }

    /// HTTP status the request layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingBody
            | Self::MissingAttachmentIdentity
            | Self::MissingResourceReference { .. }
            | Self::FileIntentMismatch { .. }
            | Self::MixedCopyAndUpload { .. }
            | Self::CopySourceNotFound { .. }
            | Self::HookFailed { .. } => 422,
            Self::ConflictExistingFile { .. } => 409,
            Self::DownloadNotFound { .. } => 404,
            Self::Unauthorized { .. } => 403,
            // Client closed the response stream mid-body.
            Self::DownloadCancelled { .. } => 499,
            Self::UploadFailed { .. } | Self::DownloadFailed { .. } | Self::DeleteFailed { .. } => {
                502
            }
        }
    }

    /// Whether the error was detected before any store mutation.
    ///
    /// Validation errors need no cleanup; everything else routes through
    /// rollback before being surfaced.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingBody
                | Self::MissingAttachmentIdentity
                | Self::MissingResourceReference { .. }
                | Self::FileIntentMismatch { .. }
                | Self::MixedCopyAndUpload { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(PipelineError::MissingBody.code(), "missing_body");
        assert_eq!(
            PipelineError::ConflictExistingFile {
                filename: "a.png".into()
            }
            .code(),
            "conflict_existing_file"
        );
        assert_eq!(
            PipelineError::HookFailed {
                source: anyhow::anyhow!("boom")
            }
            .code(),
            "hook_failed"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            PipelineError::ConflictExistingFile {
                filename: "a.png".into()
            }
            .status_code(),
            409
        );
        assert_eq!(
            PipelineError::DownloadNotFound {
                filename: "a.png".into()
            }
            .status_code(),
            404
        );
        assert_eq!(PipelineError::MissingBody.status_code(), 422);
    }

    #[test]
    fn test_validation_errors_need_no_cleanup() {
        assert!(PipelineError::MissingBody.is_validation());
        assert!(PipelineError::MixedCopyAndUpload {
            attachment_key: "k".into()
        }
        .is_validation());
        assert!(!PipelineError::ConflictExistingFile {
            filename: "a.png".into()
        }
        .is_validation());
    }
}
