pub mod external;
pub mod key;
pub mod memory;
pub mod s3;

pub use external::{CacheEntry, ExternalCache};
pub use key::{fingerprint, object_name, CacheRequest};
pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

use crate::request::Modifiers;
use crate::Result;
use bytes::Bytes;
use std::time::SystemTime;

/// One object to write to a store.
#[derive(Debug, Clone)]
pub struct PutObject<'a> {
    /// Bucket-relative name, `<fingerprint>.<format>`.
    pub name: &'a str,
    pub data: Bytes,
    /// Format of `data`; the object's content type becomes `image/<format>`.
    pub format: &'a str,
    /// Source modification time, kept in metadata as `last-modified`.
    pub mtime: SystemTime,
    /// Content-derived ETag served to clients.
    pub etag: Option<&'a str>,
    pub source_id: &'a str,
    pub source_modifiers: &'a Modifiers,
}

/// An object read back from a store.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub etag: String,
    pub last_modified: SystemTime,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Durable blob store with metadata.
///
/// Implementations treat "not there" and "cannot tell right now" the same way
/// on reads: both are `Ok(None)`. The only read error is an object whose
/// metadata is visible but whose body cannot be fetched.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes the object and returns the storage-assigned ETag.
    async fn put(&self, object: PutObject<'_>) -> Result<String>;

    async fn get(&self, name: &str) -> Result<Option<StoredObject>>;
}

/// Content type for an image format name.
pub fn content_type_for(format: &str) -> String {
    format!("image/{}", format)
}

/// Inverse of [`content_type_for`].
pub fn format_from_content_type(content_type: &str) -> Option<&str> {
    content_type
        .split(';')
        .next()
        .and_then(|essence| essence.trim().strip_prefix("image/"))
        .filter(|f| !f.is_empty())
}

/// Renders modifiers as `key:value|key:value` for object metadata.
pub fn flatten_modifiers(modifiers: &Modifiers) -> String {
    modifiers
        .iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join("|")
}
