//! Authorization seam
//!
//! The pipeline never decides permissions itself; it hands an action name
//! and the affected resource hrefs to an injected [`Authorizer`] before any
//! store mutation. A denial aborts the batch and is never masked by
//! cleanup failures.

use async_trait::async_trait;
use thiserror::Error;

/// Action names the pipeline asks about.
pub mod actions {
    pub const UPLOAD_ATTACHMENTS: &str = "upload_attachments";
    pub const VIEW_ATTACHMENTS: &str = "view_attachments";
    pub const DELETE_ATTACHMENTS: &str = "delete_attachments";
}

/// An authorization denial.
#[derive(Debug, Error)]
#[error("denied {action}: {message}")]
pub struct Denial {
    pub action: String,
    pub message: String,
}

impl Denial {
    pub fn new(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            message: message.into(),
        }
    }
}

/// Answers allow/deny for an action over a set of resource hrefs.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, action: &str, hrefs: &[String]) -> Result<(), Denial>;
}

/// Permits everything. For tests and embeddings that authorize upstream.
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _action: &str, _hrefs: &[String]) -> Result<(), Denial> {
        Ok(())
    }
}
