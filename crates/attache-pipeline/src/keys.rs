//! Store key derivation
//!
//! Final keys are deterministic (`<resourceKey>-<canonicalFilename>`) so
//! uploads and downloads resolve the same object. Temporary keys are random
//! and live in their own namespace: no user-chosen filename can collide
//! with another request's staged object, and no temp key is ever
//! client-addressable.

use attache_core::ResourceRef;
use uuid::Uuid;

use crate::filename::canonicalize;

/// Namespace prefix for temporary keys. Final keys never start with this:
/// they begin with a resource key, and canonicalization strips `/`.
pub const TEMP_PREFIX: &str = "tmp/";

/// The store key of a resource, used as the final-key prefix.
pub fn resource_key(resource: &ResourceRef) -> &str {
    resource.as_str()
}

/// Deterministic final key for an attachment.
pub fn final_key(resource: &ResourceRef, filename: &str) -> String {
    format!("{}-{}", resource_key(resource), canonicalize(filename))
}

/// Final key for a filename stored before canonicalization existed.
pub fn legacy_key(resource: &ResourceRef, filename: &str) -> String {
    format!("{}-{}", resource_key(resource), filename)
}

/// A fresh random temporary key, unrelated to any final key.
pub fn temp_key() -> String {
    format!("{}{}", TEMP_PREFIX, Uuid::new_v4())
}

/// Href under which an attachment is exposed.
pub fn href_for(resource: &ResourceRef, filename: &str) -> String {
    format!("/resources/{}/attachments/{}", resource, filename)
}

/// Href of the owning resource itself, for authorization checks.
pub fn resource_href(resource: &ResourceRef) -> String {
    format!("/resources/{}", resource)
}

/// Parse an attachment href back into its resource and filename segments.
///
/// Accepts the same shape [`href_for`] emits; the filename may itself
/// contain `/` (it is canonicalized before key derivation anyway).
pub fn key_from_href(href: &str) -> Option<(ResourceRef, String)> {
    let rest = href.strip_prefix("/resources/")?;
    let (resource, filename) = rest.split_once("/attachments/")?;
    if resource.is_empty() || filename.is_empty() {
        return None;
    }
    Some((ResourceRef::new(resource), filename.to_string()))
}
