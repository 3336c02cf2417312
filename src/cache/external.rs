//! Durable cross-process cache of transformed images.
//!
//! Entries are content addressed: the object name is derived from the
//! fingerprint of `{id, modifiers, mtime, maxAge}` plus the requested format,
//! so a changed source, transformation or cache policy lands on a new object
//! and old objects are never served for new content.

use super::key::{fingerprint, object_name, CacheRequest};
use super::{format_from_content_type, ObjectStore, PutObject, S3ObjectStore};
use crate::config::StoreConfig;
use crate::Result;
use bytes::Bytes;
use std::sync::Arc;
use std::time::SystemTime;

/// A cache hit.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub format: String,
    pub data: Bytes,
    pub etag: String,
    pub last_modified: SystemTime,
}

/// Maps logical requests onto object names and reads/writes them through an
/// [`ObjectStore`]. Without a store every lookup misses and every write is
/// skipped.
#[derive(Clone, Default)]
pub struct ExternalCache {
    store: Option<Arc<dyn ObjectStore>>,
}

impl ExternalCache {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store: Some(store) }
    }

    pub fn disabled() -> Self {
        Self { store: None }
    }

    /// S3-backed cache when a store is configured, disabled otherwise.
    pub async fn from_config(config: Option<&StoreConfig>) -> Self {
        match config {
            Some(store) => Self::new(Arc::new(S3ObjectStore::from_config(store).await)),
            None => {
                tracing::info!("External cache disabled: no S3 credentials or bucket configured");
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub async fn lookup(&self, request: &CacheRequest<'_>) -> Result<Option<CacheEntry>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let key = fingerprint(request);
        let requested = request.format();
        let name = object_name(&key, requested);

        let Some(object) = store.get(&name).await? else {
            tracing::info!("skipped external cache: {}", key);
            return Ok(None);
        };
        tracing::info!("retrieve external cache: {}", key);

        let format = object
            .content_type
            .as_deref()
            .and_then(format_from_content_type)
            .unwrap_or(requested)
            .to_string();
        Ok(Some(CacheEntry {
            key,
            format,
            data: object.data,
            etag: object.etag,
            last_modified: object.last_modified,
        }))
    }

    /// Writes a freshly transformed image. `format` is the format the engine
    /// actually produced; the object name still uses the requested one so the
    /// next lookup finds it. Returns the storage ETag, or `None` when disabled.
    pub async fn store(
        &self,
        request: &CacheRequest<'_>,
        etag: &str,
        data: Bytes,
        format: Option<&str>,
    ) -> Result<Option<String>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let key = fingerprint(request);
        let requested = request.format();
        let name = object_name(&key, requested);
        tracing::info!("update external cache: {}", key);

        let storage_etag = store
            .put(PutObject {
                name: &name,
                data,
                format: format.unwrap_or(requested),
                mtime: request.mtime.unwrap_or_else(SystemTime::now),
                etag: Some(etag),
                source_id: request.id,
                source_modifiers: request.modifiers,
            })
            .await?;
        Ok(Some(storage_etag))
    }
}
