//! Per-request delivery pipeline: parse, conditional checks, external cache,
//! transformation and response assembly.

use crate::cache::{content_type_for, CacheRequest, ExternalCache};
use crate::engine::ImageEngine;
use crate::headers::{http_date, ResponseHeaders};
use crate::request::parse_request;
use crate::{ImageKitError, Result, METRICS};
use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const CONTENT_SECURITY_POLICY: &str = "default-src 'none'";

/// Content-derived entity tag: body length and a truncated SHA-256, both hex.
pub fn content_etag(data: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(data));
    format!("\"{:x}-{}\"", data.len(), &digest[..27])
}

/// `Cache-Control` value for a max-age in seconds.
pub fn cache_control(max_age: u64) -> String {
    format!("max-age={}, public, s-maxage={}", max_age, max_age)
}

// HTTP dates have no sub-second part, compare on whole seconds.
fn truncate_to_secs(t: SystemTime) -> SystemTime {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => UNIX_EPOCH + Duration::from_secs(d.as_secs()),
        Err(_) => t,
    }
}

/// `true` when `If-Modified-Since` is at or after `mtime`.
pub fn not_modified_since(if_modified_since: &str, mtime: SystemTime) -> bool {
    match httpdate::parse_http_date(if_modified_since.trim()) {
        Ok(since) => since >= truncate_to_secs(mtime),
        Err(_) => false,
    }
}

/// Content type of `/favicon.svg` or `/favicon.ico`, matched case-insensitively.
fn favicon_type(path: &str) -> Option<(&'static str, String)> {
    let name = path.strip_prefix('/')?;
    let (stem, ext) = name.rsplit_once('.')?;
    if !stem.eq_ignore_ascii_case("favicon") {
        return None;
    }
    let content_type = match ext.to_ascii_lowercase().as_str() {
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        _ => return None,
    };
    Some((content_type, name.to_string()))
}

fn header_str<'h>(headers: &'h HeaderMap, name: header::HeaderName) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn not_modified(headers: ResponseHeaders) -> Response {
    (StatusCode::NOT_MODIFIED, headers.into_header_map()).into_response()
}

/// Serves images for `/<modifiers>/<resource-id>` requests.
///
/// The handler keeps no per-request state of its own; the engine and the
/// external cache are shared across all requests.
pub struct RequestHandler {
    engine: Arc<dyn ImageEngine>,
    cache: ExternalCache,
    public_dir: PathBuf,
}

impl RequestHandler {
    pub fn new(
        engine: Arc<dyn ImageEngine>,
        cache: ExternalCache,
        public_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            cache,
            public_dir: public_dir.into(),
        }
    }

    pub async fn handle(&self, uri: &Uri, headers: &HeaderMap) -> Response {
        match self.respond(uri, headers).await {
            Ok(response) => response,
            Err(err) => {
                METRICS.errors.fetch_add(1, Ordering::Relaxed);
                if err.status_code().is_server_error() {
                    tracing::error!("Request {} failed: {}", uri, err);
                } else {
                    tracing::debug!("Request {} rejected: {}", uri, err);
                }
                err.into_response()
            }
        }
    }

    async fn serve_favicon(&self, file: &str, content_type: &'static str) -> Result<Response> {
        let path = self.public_dir.join(file);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|_| ImageKitError::NotFound(path.display().to_string()))?;
        Ok(([(header::CONTENT_TYPE, content_type)], data).into_response())
    }

    async fn respond(&self, uri: &Uri, request_headers: &HeaderMap) -> Result<Response> {
        if let Some((content_type, file)) = favicon_type(uri.path()) {
            return self.serve_favicon(&file, content_type).await;
        }

        let target = uri.path_and_query().map_or_else(|| uri.path(), |pq| pq.as_str());
        let parsed = parse_request(target, header_str(request_headers, header::ACCEPT))?;
        let mut headers = ResponseHeaders::new();
        if parsed.vary_accept {
            headers.append(header::VARY, "Accept");
        }

        let meta = self.engine.source_meta(&parsed.id, &parsed.modifiers).await?;
        headers.set_if_absent(header::CONTENT_SECURITY_POLICY, CONTENT_SECURITY_POLICY);

        // Times an HTTP date cannot express get neither header nor 304.
        let last_modified = meta.mtime.and_then(|t| http_date(t).map(|date| (t, date)));
        if let Some((mtime, date)) = last_modified {
            headers.set_if_absent(header::LAST_MODIFIED, &date);
            if let Some(since) = header_str(request_headers, header::IF_MODIFIED_SINCE) {
                if not_modified_since(since, mtime) {
                    tracing::debug!("Not modified since {}: {}", since, parsed.id);
                    return Ok(not_modified(headers));
                }
            }
        }

        if let Some(max_age) = meta.max_age {
            headers.set_if_absent(header::CACHE_CONTROL, &cache_control(max_age));
        }

        let cache_request = CacheRequest {
            id: &parsed.id,
            modifiers: &parsed.modifiers,
            mtime: meta.mtime,
            max_age: meta.max_age,
        };
        let hit = self.cache.lookup(&cache_request).await?;

        let (data, format, etag) = match &hit {
            Some(entry) => {
                METRICS.cache_hits.fetch_add(1, Ordering::Relaxed);
                (entry.data.clone(), Some(entry.format.clone()), entry.etag.clone())
            }
            None => {
                METRICS.cache_misses.fetch_add(1, Ordering::Relaxed);
                let processed = self.engine.process(&parsed.id, &parsed.modifiers).await?;
                METRICS.transforms.fetch_add(1, Ordering::Relaxed);
                let etag = content_etag(&processed.data);
                (processed.data, processed.format, etag)
            }
        };

        headers.set_if_absent(header::ETAG, &etag);
        let if_none_match = header_str(request_headers, header::IF_NONE_MATCH).map(str::trim);
        if if_none_match == Some(etag.as_str()) {
            tracing::debug!("ETag {} matched: {}", etag, parsed.id);
            return Ok(not_modified(headers));
        }

        if let Some(format) = &format {
            headers.set_if_absent(header::CONTENT_TYPE, &content_type_for(format));
        }

        if hit.is_none() {
            self.populate(&cache_request, &etag, data.clone(), format.as_deref()).await;
        }

        Ok((StatusCode::OK, headers.into_header_map(), Body::from(data)).into_response())
    }

    // Write failures never fail the request.
    async fn populate(
        &self,
        request: &CacheRequest<'_>,
        etag: &str,
        data: Bytes,
        format: Option<&str>,
    ) {
        match self.cache.store(request, etag, data, format).await {
            Ok(Some(storage_etag)) => {
                METRICS.cache_writes.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Cached {} (storage etag {})", request.id, storage_etag);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!("Failed to populate external cache for {}: {}", request.id, err)
            }
        }
    }
}
