//! The transformation engine seam.
//!
//! The delivery layer only ever asks an engine two things: what it knows about
//! a source (so conditional requests and cache keys can be decided before any
//! pixels are touched) and, on a cache miss, to produce the transformed bytes.

use crate::request::Modifiers;
use crate::Result;
use bytes::Bytes;
use std::time::SystemTime;

pub mod local;

pub use local::LocalEngine;

/// Freshness information reported for a source under a set of modifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceMeta {
    pub mtime: Option<SystemTime>,
    /// Suggested `max-age` in seconds.
    pub max_age: Option<u64>,
}

/// Transformed image bytes together with the format they are encoded in.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub data: Bytes,
    pub format: Option<String>,
}

#[async_trait::async_trait]
pub trait ImageEngine: Send + Sync {
    /// Looks up source freshness without transforming anything.
    async fn source_meta(&self, id: &str, modifiers: &Modifiers) -> Result<SourceMeta>;

    /// Loads the source and applies `modifiers`.
    async fn process(&self, id: &str, modifiers: &Modifiers) -> Result<ProcessedImage>;
}
