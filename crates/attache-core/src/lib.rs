//! # attache-core
//!
//! Core types for the Attache attachment pipeline:
//! - Pipeline error taxonomy with stable machine-readable codes
//! - Result type alias
//! - Pipeline configuration
//! - Authorization seam (`Authorizer`)
//! - Resource references

pub mod auth;
pub mod config;
pub mod error;
pub mod types;

pub use auth::{actions, AllowAll, Authorizer, Denial};
pub use config::{HookStrategy, PipelineConfig};
pub use error::{PipelineError, PipelineResult};
pub use types::ResourceRef;
