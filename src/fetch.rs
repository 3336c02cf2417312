use crate::engine::SourceMeta;
use crate::ImageKitError;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use mime::Mime;
use reqwest::{header, Client, Response, StatusCode};

fn check_status(url: &str, resp: &Response) -> Result<(), ImageKitError> {
    match resp.status() {
        s if s.is_success() => Ok(()),
        StatusCode::NOT_FOUND => Err(ImageKitError::NotFound(url.to_string())),
        s => Err(ImageKitError::NetworkError(format!("Upstream status: {}", s))),
    }
}

/// Extracts `max-age` from a `Cache-Control` header value.
pub fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control.split(',').find_map(|directive| {
        let (name, value) = directive.trim().split_once('=')?;
        if name.trim().eq_ignore_ascii_case("max-age") {
            value.trim().trim_matches('"').parse().ok()
        } else {
            None
        }
    })
}

/// Reads source freshness with a `HEAD` request.
///
/// `mtime` comes from `Last-Modified`; `max_age` from the upstream
/// `Cache-Control` header, falling back to `default_max_age`.
pub async fn fetch_meta(
    client: &Client,
    url: &str,
    default_max_age: u64,
) -> Result<SourceMeta, ImageKitError> {
    let resp = client
        .head(url)
        .send()
        .await
        .map_err(|e| ImageKitError::NetworkError(e.to_string()))?;
    check_status(url, &resp)?;

    let headers = resp.headers();
    let mtime = headers
        .get(header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| httpdate::parse_http_date(v).ok());
    let max_age = headers
        .get(header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_max_age)
        .unwrap_or(default_max_age);

    Ok(SourceMeta {
        mtime,
        max_age: Some(max_age),
    })
}

/// Fetches a source image from a remote URL.
///
/// Rejects non-2xx responses, non-image content types (when the header is
/// parseable) and bodies larger than `max_size`. The body is streamed so a
/// lying `Content-Length` cannot push us past the limit.
pub async fn fetch_source(
    client: &Client,
    url: &str,
    max_size: usize,
) -> Result<Bytes, ImageKitError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| ImageKitError::NetworkError(e.to_string()))?;
    check_status(url, &resp)?;

    let ct = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if let Ok(m) = ct.parse::<Mime>() {
        if m.type_().as_str() != "image" {
            return Err(ImageKitError::InvalidArgument(
                "Source is not an image".into(),
            ));
        }
    }
    // Unknown MIME types continue - will be validated during decode

    if let Some(len) = resp.content_length() {
        if len as usize > max_size {
            return Err(ImageKitError::InvalidArgument(
                "Input exceeds size limit".into(),
            ));
        }
    }

    let mut buf = BytesMut::with_capacity(8192);
    let mut stream = resp.bytes_stream();

    while let Some(chunk) = stream
        .next()
        .await
        .transpose()
        .map_err(|e| ImageKitError::NetworkError(e.to_string()))?
    {
        if buf.len() + chunk.len() > max_size {
            return Err(ImageKitError::InvalidArgument(
                "Input exceeds size limit".into(),
            ));
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(buf.freeze())
}
