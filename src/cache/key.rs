//! External cache key derivation.

use crate::request::Modifiers;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Format segment used when the request names no output format.
pub const UNKNOWN_FORMAT: &str = "unknown";

/// The logical request an external cache entry answers.
#[derive(Debug, Clone, Copy)]
pub struct CacheRequest<'a> {
    pub id: &'a str,
    pub modifiers: &'a Modifiers,
    pub mtime: Option<SystemTime>,
    pub max_age: Option<u64>,
}

impl<'a> CacheRequest<'a> {
    /// Output format named by the modifiers (`format`, then `f`).
    pub fn format(&self) -> &'a str {
        self.modifiers
            .get("format")
            .or_else(|| self.modifiers.get("f"))
            .map(String::as_str)
            .unwrap_or(UNKNOWN_FORMAT)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Canonical<'a> {
    id: &'a str,
    modifiers: &'a Modifiers,
    #[serde(skip_serializing_if = "Option::is_none")]
    mtime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_age: Option<u64>,
}

fn rfc3339(t: SystemTime) -> String {
    let nanos = match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i128,
        Err(e) => -(e.duration().as_nanos() as i128),
    };
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| format!("{:?}", t))
}

/// SHA-256 hex digest of the canonical JSON rendering of `request`.
///
/// Modifiers serialize in key order, so two requests that differ only in how
/// their modifiers were written hash identically.
pub fn fingerprint(request: &CacheRequest<'_>) -> String {
    let canonical = Canonical {
        id: request.id,
        modifiers: request.modifiers,
        mtime: request.mtime.map(rfc3339),
        max_age: request.max_age,
    };
    // Serializing strings and a string map cannot fail.
    let json = serde_json::to_vec(&canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&json);
    hex::encode(hasher.finalize())
}

/// Bucket-relative object name for a fingerprint.
pub fn object_name(fingerprint: &str, format: &str) -> String {
    format!("{}.{}", fingerprint, format)
}
