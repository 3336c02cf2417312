use super::{content_type_for, flatten_modifiers, ObjectStore, PutObject, StoredObject};
use crate::config::StoreConfig;
use crate::headers::http_date;
use crate::{ImageKitError, Result};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_sdk_s3::Client;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::collections::HashMap;
use std::time::SystemTime;

pub const META_SOURCE_ID: &str = "sourceId";
pub const META_SOURCE_MODIFIERS: &str = "sourceModifiers";
pub const META_LAST_MODIFIED: &str = "last-modified";
pub const META_ETAG: &str = "etag";

// Control and non-ASCII bytes cannot travel in `x-amz-meta-*` headers.
const META_ENCODE_SET: &AsciiSet = &CONTROLS.add(b'%');

pub fn encode_meta(value: &str) -> String {
    utf8_percent_encode(value, META_ENCODE_SET).to_string()
}

pub fn decode_meta(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

// S3 lowercases user metadata keys, other backends may not.
fn meta_value<'m>(metadata: &'m HashMap<String, String>, key: &str) -> Option<&'m str> {
    metadata
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// Picks the ETag and modification time served for a stored object.
///
/// Values written into metadata by `put` win: the storage ETag is a digest of
/// the body as stored and the storage timestamp is the write time, neither of
/// which is what clients were first given.
pub fn served_validators(
    metadata: &HashMap<String, String>,
    storage_etag: &str,
    storage_last_modified: SystemTime,
) -> (String, SystemTime) {
    let etag = meta_value(metadata, META_ETAG)
        .map(decode_meta)
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| storage_etag.to_string());
    let last_modified = meta_value(metadata, META_LAST_MODIFIED)
        .and_then(|v| httpdate::parse_http_date(v).ok())
        .unwrap_or(storage_last_modified);
    (etag, last_modified)
}

/// Object store on an S3-compatible service (AWS S3, MinIO, ...).
///
/// The bucket is checked on every call rather than remembered, so a bucket
/// deleted behind our back is recreated on the next write and reads simply
/// miss in the meantime.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Builds a path-style client for the configured endpoint and credentials.
    pub async fn from_config(config: &StoreConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "imagekit-edge",
        );
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint_url())
            .credentials_provider(credentials)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        tracing::info!(
            "External cache enabled: bucket={} endpoint={}",
            config.bucket,
            config.endpoint_url()
        );
        Self::new(Client::from_conf(s3_config), config.bucket.clone())
    }

    /// Missing bucket and failed checks both read as `false`; failures are logged.
    async fn bucket_exists(&self) -> bool {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => true,
            Err(err) => {
                let not_found = err.as_service_error().map_or(false, |e| e.is_not_found());
                if !not_found {
                    tracing::error!(
                        "Bucket check failed for {}: {}",
                        self.bucket,
                        DisplayErrorContext(&err)
                    );
                }
                false
            }
        }
    }

    async fn ensure_bucket(&self) -> Result<()> {
        if self.bucket_exists().await {
            return Ok(());
        }
        match self.client.create_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                tracing::info!("Created bucket {}", self.bucket);
                Ok(())
            }
            Err(err) => {
                let exists = err.as_service_error().map_or(false, |e| {
                    e.is_bucket_already_owned_by_you() || e.is_bucket_already_exists()
                });
                if exists {
                    Ok(())
                } else {
                    Err(ImageKitError::Storage(format!(
                        "create bucket {}: {}",
                        self.bucket,
                        DisplayErrorContext(&err)
                    )))
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, object: PutObject<'_>) -> Result<String> {
        tracing::debug!("put: {}", object.name);
        self.ensure_bucket().await?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(object.name)
            .content_type(content_type_for(object.format))
            .metadata(META_SOURCE_ID, encode_meta(object.source_id))
            .metadata(
                META_SOURCE_MODIFIERS,
                encode_meta(&flatten_modifiers(object.source_modifiers)),
            )
            .body(ByteStream::from(object.data));
        // Without it reads fall back to the storage timestamp.
        if let Some(date) = http_date(object.mtime) {
            request = request.metadata(META_LAST_MODIFIED, date);
        }
        if let Some(etag) = object.etag {
            request = request.metadata(META_ETAG, encode_meta(etag));
        }

        let output = request.send().await.map_err(|err| {
            ImageKitError::Storage(format!("put {}: {}", object.name, DisplayErrorContext(&err)))
        })?;
        let etag = output.e_tag().unwrap_or_default().to_string();
        tracing::debug!("put: {} done: {}", object.name, etag);
        Ok(etag)
    }

    async fn get(&self, name: &str) -> Result<Option<StoredObject>> {
        tracing::debug!("get: {}", name);
        if !self.bucket_exists().await {
            tracing::debug!("get: bucket {} unavailable, treating {} as absent", self.bucket, name);
            return Ok(None);
        }

        let head = match self.client.head_object().bucket(&self.bucket).key(name).send().await {
            Ok(head) => head,
            Err(err) => {
                let not_found = err.as_service_error().map_or(false, |e| e.is_not_found());
                if not_found {
                    tracing::debug!("get: no object {}", name);
                } else {
                    tracing::error!("Stat failed for {}: {}", name, DisplayErrorContext(&err));
                }
                return Ok(None);
            }
        };

        let (Some(storage_etag), Some(storage_last_modified)) = (
            head.e_tag(),
            head.last_modified().copied().and_then(|t: DateTime| SystemTime::try_from(t).ok()),
        ) else {
            tracing::debug!("get: no stat info found for {}", name);
            return Ok(None);
        };
        let metadata = head.metadata().cloned().unwrap_or_default();
        let (etag, last_modified) =
            served_validators(&metadata, storage_etag, storage_last_modified);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .map_err(|err| {
                tracing::error!("Fetch failed for {}: {}", name, DisplayErrorContext(&err));
                ImageKitError::CacheObjectUnreadable(name.to_string())
            })?;
        let data = response
            .body
            .collect()
            .await
            .map_err(|err| {
                tracing::error!("Body read failed for {}: {}", name, err);
                ImageKitError::CacheObjectUnreadable(name.to_string())
            })?
            .into_bytes();

        tracing::debug!("get: {} etag={} size={}", name, etag, data.len());
        Ok(Some(StoredObject {
            etag,
            last_modified,
            content_type: head.content_type().map(str::to_owned),
            data,
        }))
    }
}
