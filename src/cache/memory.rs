use super::{content_type_for, flatten_modifiers, ObjectStore, PutObject, StoredObject};
use crate::{ImageKitError, Result};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct MemoryObject {
    object: StoredObject,
    source_id: String,
    source_modifiers: String,
}

/// Process-local object store.
///
/// Behaves like the S3 store for a single process, which makes it the store
/// of choice for tests. Objects can be marked unreadable to exercise the
/// "metadata present, body missing" path.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, MemoryObject>>,
    unreadable: RwLock<HashSet<String>>,
    puts: AtomicUsize,
    gets: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls served.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }

    /// Number of `get` calls that returned an object.
    pub fn hit_count(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    pub async fn names(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    /// `(sourceId, sourceModifiers)` metadata of a stored object.
    pub async fn source_metadata(&self, name: &str) -> Option<(String, String)> {
        self.objects
            .read()
            .await
            .get(name)
            .map(|o| (o.source_id.clone(), o.source_modifiers.clone()))
    }

    /// Makes later body reads of `name` fail while its metadata stays visible.
    pub async fn mark_unreadable(&self, name: &str) {
        self.unreadable.write().await.insert(name.to_string());
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, object: PutObject<'_>) -> Result<String> {
        let storage_etag = format!("\"{}\"", hex::encode(Sha256::digest(&object.data)));
        let stored = MemoryObject {
            object: StoredObject {
                etag: object.etag.map(str::to_owned).unwrap_or_else(|| storage_etag.clone()),
                last_modified: object.mtime,
                content_type: Some(content_type_for(object.format)),
                data: object.data,
            },
            source_id: object.source_id.to_string(),
            source_modifiers: flatten_modifiers(object.source_modifiers),
        };
        self.objects.write().await.insert(object.name.to_string(), stored);
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(storage_etag)
    }

    async fn get(&self, name: &str) -> Result<Option<StoredObject>> {
        let found = self.objects.read().await.get(name).map(|o| o.object.clone());
        let Some(object) = found else {
            return Ok(None);
        };
        if self.unreadable.read().await.contains(name) {
            return Err(ImageKitError::CacheObjectUnreadable(name.to_string()));
        }
        self.gets.fetch_add(1, Ordering::Relaxed);
        Ok(Some(object))
    }
}
