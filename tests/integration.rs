use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use imagekit_edge::cache::{ExternalCache, MemoryObjectStore};
use imagekit_edge::config::StoreConfig;
use imagekit_edge::engine::{ImageEngine, ProcessedImage, SourceMeta};
use imagekit_edge::handler::RequestHandler;
use imagekit_edge::request::Modifiers;
use imagekit_edge::{router, ImageKitError, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tower::util::ServiceExt; // for `oneshot`

const MTIME_SECS: u64 = 1_700_000_000;

/// Engine that renders `<format>:<id>` and counts how often it was asked to.
struct CountingEngine {
    meta: SourceMeta,
    processed: AtomicUsize,
}

impl CountingEngine {
    fn new(meta: SourceMeta) -> Arc<Self> {
        Arc::new(Self {
            meta,
            processed: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }
}

fn check_id(id: &str) -> Result<()> {
    match id {
        "missing.png" => Err(ImageKitError::NotFound(id.to_string())),
        "corrupt.png" => Err(ImageKitError::Engine {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            status_text: "IPX_BAD_PIXELS".into(),
            message: "cannot decode corrupt.png".into(),
        }),
        _ => Ok(()),
    }
}

#[async_trait::async_trait]
impl ImageEngine for CountingEngine {
    async fn source_meta(&self, id: &str, _modifiers: &Modifiers) -> Result<SourceMeta> {
        match id {
            "missing.png" => Err(ImageKitError::NotFound(id.to_string())),
            _ => Ok(self.meta),
        }
    }

    async fn process(&self, id: &str, modifiers: &Modifiers) -> Result<ProcessedImage> {
        check_id(id)?;
        self.processed.fetch_add(1, Ordering::SeqCst);
        let format = modifiers
            .get("format")
            .or_else(|| modifiers.get("f"))
            .cloned()
            .unwrap_or_else(|| "png".to_string());
        Ok(ProcessedImage {
            data: Bytes::from(format!("{}:{}", format, id)),
            format: Some(format),
        })
    }
}

fn mtime() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(MTIME_SECS)
}

fn default_meta() -> SourceMeta {
    SourceMeta {
        mtime: Some(mtime()),
        max_age: Some(3600),
    }
}

struct Harness {
    app: Router,
    engine: Arc<CountingEngine>,
    store: Arc<MemoryObjectStore>,
}

fn harness_with(meta: SourceMeta, public_dir: PathBuf) -> Harness {
    let engine = CountingEngine::new(meta);
    let store = Arc::new(MemoryObjectStore::new());
    let cache = ExternalCache::new(store.clone());
    let handler = RequestHandler::new(engine.clone(), cache, public_dir);
    Harness {
        app: router(handler),
        engine,
        store,
    }
}

fn harness() -> Harness {
    harness_with(default_meta(), PathBuf::from("./public"))
}

async fn send(
    app: &Router,
    uri: &str,
    headers: &[(header::HeaderName, &str)],
) -> (StatusCode, HeaderMap, Bytes) {
    let mut request = Request::builder().uri(uri);
    for (name, value) in headers {
        request = request.header(name, *value);
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body)
}

fn error_message(body: &[u8]) -> String {
    let json: Value = serde_json::from_slice(body).unwrap();
    json["error"]["message"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_miss_then_hit() {
    let h = harness();

    let (status, headers, body) = send(&h.app, "/w_200,f_webp/cat.png", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from("webp:cat.png"));
    assert_eq!(headers[header::CONTENT_TYPE], "image/webp");
    assert_eq!(headers[header::CONTENT_SECURITY_POLICY], "default-src 'none'");
    assert_eq!(headers[header::CACHE_CONTROL], "max-age=3600, public, s-maxage=3600");
    assert_eq!(headers[header::LAST_MODIFIED], httpdate::fmt_http_date(mtime()).as_str());
    let first_etag = headers[header::ETAG].to_str().unwrap().to_string();
    assert_eq!(h.engine.calls(), 1);
    assert_eq!(h.store.put_count(), 1);

    let (status, headers, body) = send(&h.app, "/w_200,f_webp/cat.png", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from("webp:cat.png"));
    assert_eq!(headers[header::CONTENT_TYPE], "image/webp");
    assert_eq!(headers[header::ETAG], first_etag.as_str());
    assert_eq!(h.engine.calls(), 1, "hit must not transform");
    assert_eq!(h.store.put_count(), 1, "hit must not be rewritten");
    assert_eq!(h.store.hit_count(), 1);
}

#[tokio::test]
async fn test_modifier_order_shares_cache_entry() {
    let h = harness();
    send(&h.app, "/w_200,f_webp/cat.png", &[]).await;
    send(&h.app, "/f_webp,w_200/cat.png", &[]).await;
    assert_eq!(h.engine.calls(), 1);
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test]
async fn test_if_modified_since_returns_304_before_any_work() {
    let h = harness();
    let since = httpdate::fmt_http_date(mtime() + Duration::from_secs(60));

    let (status, headers, body) =
        send(&h.app, "/w_200/cat.png", &[(header::IF_MODIFIED_SINCE, since.as_str())]).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert!(body.is_empty());
    assert!(headers.contains_key(header::LAST_MODIFIED));
    assert_eq!(h.engine.calls(), 0);
    assert_eq!(h.store.put_count(), 0);
}

#[tokio::test]
async fn test_if_modified_since_returns_304_with_cached_entry() {
    let h = harness();
    send(&h.app, "/w_200/cat.png", &[]).await;

    let since = httpdate::fmt_http_date(mtime());
    let (status, _, body) =
        send(&h.app, "/w_200/cat.png", &[(header::IF_MODIFIED_SINCE, since.as_str())]).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert!(body.is_empty());
    assert_eq!(h.store.hit_count(), 0, "304 decided before cache lookup");
}

#[tokio::test]
async fn test_stale_if_modified_since_is_ignored() {
    let h = harness();
    let since = httpdate::fmt_http_date(mtime() - Duration::from_secs(1));
    let (status, _, body) =
        send(&h.app, "/w_200/cat.png", &[(header::IF_MODIFIED_SINCE, since.as_str())]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.is_empty());
}

#[tokio::test]
async fn test_if_none_match_with_stored_etag() {
    let h = harness();
    let (_, headers, _) = send(&h.app, "/w_200,f_webp/cat.png", &[]).await;
    let etag = headers[header::ETAG].to_str().unwrap().to_string();

    let stale = httpdate::fmt_http_date(mtime() - Duration::from_secs(3600));
    let (status, headers, body) = send(
        &h.app,
        "/w_200,f_webp/cat.png",
        &[(header::IF_NONE_MATCH, etag.as_str()), (header::IF_MODIFIED_SINCE, stale.as_str())],
    )
    .await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert!(body.is_empty());
    assert_eq!(headers[header::ETAG], etag.as_str());
    assert_eq!(h.engine.calls(), 1);

    let (status, _, _) =
        send(&h.app, "/w_200,f_webp/cat.png", &[(header::IF_NONE_MATCH, "\"other\"")]).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_if_none_match_on_first_transform() {
    let h = harness();
    let (_, headers, _) = send(&h.app, "/w_300/cat.png", &[]).await;
    let etag = headers[header::ETAG].to_str().unwrap().to_string();

    // A fresh instance renders the same bytes, so the etag is known up front.
    let h2 = harness();
    let (status, _, _) =
        send(&h2.app, "/w_300/cat.png", &[(header::IF_NONE_MATCH, etag.as_str())]).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert_eq!(h2.engine.calls(), 1);
    assert_eq!(h2.store.put_count(), 0);
}

#[tokio::test]
async fn test_auto_format_negotiates_webp() {
    let h = harness();
    let (status, headers, body) =
        send(&h.app, "/f_auto,w_100/cat.png", &[(header::ACCEPT, "image/webp,*/*")]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from("webp:cat.png"));
    assert_eq!(headers[header::CONTENT_TYPE], "image/webp");
    assert_eq!(headers[header::VARY], "Accept");
}

#[tokio::test]
async fn test_auto_format_falls_back_to_jpeg() {
    let h = harness();
    let (status, headers, body) =
        send(&h.app, "/format_auto/cat.png", &[(header::ACCEPT, "text/html")]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from("jpeg:cat.png"));
    assert_eq!(headers[header::VARY], "Accept");
}

#[tokio::test]
async fn test_explicit_format_has_no_vary() {
    let h = harness();
    let (_, headers, _) = send(&h.app, "/f_png/cat.png", &[(header::ACCEPT, "image/webp")]).await;
    assert!(!headers.contains_key(header::VARY));
}

#[tokio::test]
async fn test_missing_id() {
    let h = harness();
    for uri in ["/_/", "/_"] {
        let (status, headers, body) = send(&h.app, uri, &[]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        let message = error_message(&body);
        assert!(message.starts_with("[400] [IPX_MISSING_ID]"), "{}", message);
        assert!(message.contains(uri), "{}", message);
    }
}

#[tokio::test]
async fn test_missing_modifiers() {
    let h = harness();
    let (status, _, body) = send(&h.app, "/", &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).starts_with("[400] [IPX_MISSING_MODIFIERS]"));
}

#[tokio::test]
async fn test_source_not_found() {
    let h = harness();
    let (status, _, body) = send(&h.app, "/w_10/missing.png", &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_message(&body), "[404] [IPX_FILE_NOT_FOUND] File not found: missing.png");
    assert_eq!(h.engine.calls(), 0);
}

#[tokio::test]
async fn test_engine_status_passes_through() {
    let h = harness();
    let (status, _, body) = send(&h.app, "/w_10/corrupt.png", &[]).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_message(&body), "[422] [IPX_BAD_PIXELS] cannot decode corrupt.png");
    assert_eq!(h.store.put_count(), 0);
}

#[tokio::test]
async fn test_unreadable_cached_object_is_not_found() {
    let h = harness();
    send(&h.app, "/w_200/cat.png", &[]).await;
    for name in h.store.names().await {
        h.store.mark_unreadable(&name).await;
    }

    let (status, _, body) = send(&h.app, "/w_200/cat.png", &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(error_message(&body).starts_with("[404] [IPX_CACHE_NOT_FOUND]"));
    assert_eq!(h.engine.calls(), 1);
}

#[tokio::test]
async fn test_disabled_cache_always_transforms() {
    let engine = CountingEngine::new(default_meta());
    let app = router(RequestHandler::new(engine.clone(), ExternalCache::disabled(), "./public"));

    for _ in 0..2 {
        let (status, headers, body) = send(&app, "/w_200,f_webp/cat.png", &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from("webp:cat.png"));
        assert!(headers.contains_key(header::ETAG));
    }
    assert_eq!(engine.calls(), 2);
}

#[tokio::test]
async fn test_unreachable_store_still_serves() {
    let store = StoreConfig {
        endpoint: "127.0.0.1".into(),
        port: 1,
        use_ssl: false,
        region: "us-east-1".into(),
        access_key: "key".into(),
        secret_key: "secret".into(),
        bucket: "images".into(),
    };
    let engine = CountingEngine::new(default_meta());
    let cache = ExternalCache::from_config(Some(&store)).await;
    assert!(cache.is_enabled());
    let app = router(RequestHandler::new(engine.clone(), cache, "./public"));

    let (status, headers, body) = send(&app, "/w_200,f_webp/cat.png", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from("webp:cat.png"));
    assert_eq!(headers[header::CONTENT_TYPE], "image/webp");
    assert_eq!(engine.calls(), 1);
}

#[tokio::test]
async fn test_source_without_meta_skips_freshness_headers() {
    let h = harness_with(SourceMeta::default(), PathBuf::from("./public"));
    let (status, headers, _) = send(
        &h.app,
        "/w_200/cat.png",
        &[(header::IF_MODIFIED_SINCE, "Sun, 06 Nov 2044 08:49:37 GMT")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!headers.contains_key(header::LAST_MODIFIED));
    assert!(!headers.contains_key(header::CACHE_CONTROL));
    assert_eq!(h.store.put_count(), 1);
}

#[tokio::test]
async fn test_favicon_served_from_public_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("favicon.ico"), b"ico-bytes").unwrap();
    let h = harness_with(default_meta(), dir.path().to_path_buf());

    let (status, headers, body) = send(&h.app, "/favicon.ico", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/x-icon");
    assert_eq!(body, Bytes::from_static(b"ico-bytes"));

    let (status, _, body) = send(&h.app, "/favicon.svg", &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(error_message(&body).starts_with("[404] [IPX_FILE_NOT_FOUND]"));
    assert_eq!(h.engine.calls(), 0);
}

#[tokio::test]
async fn test_health_endpoint() {
    let h = harness();
    let (status, _, body) = send(&h.app, "/health", &[]).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "imagekit-edge");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let h = harness();
    send(&h.app, "/w_200/cat.png", &[]).await;
    let (status, headers, body) = send(&h.app, "/metrics", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/plain"));
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("imagekit_cache_misses_total"));
    assert!(text.contains("imagekit_transforms_total"));
}

#[tokio::test]
async fn test_mtime_outside_http_date_range_is_served() {
    let day = Duration::from_secs(86_400);
    let far_future = UNIX_EPOCH + Duration::from_secs(253_402_300_800) + day;
    for mtime in [UNIX_EPOCH - day, far_future] {
        let meta = SourceMeta {
            mtime: Some(mtime),
            max_age: Some(60),
        };
        let h = harness_with(meta, PathBuf::from("./public"));
        let since = [(header::IF_MODIFIED_SINCE, "Fri, 31 Dec 9999 23:59:59 GMT")];

        let (status, headers, body) = send(&h.app, "/_/old.png", &since).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from("png:old.png"));
        assert!(!headers.contains_key(header::LAST_MODIFIED));
        assert_eq!(headers[header::CACHE_CONTROL], "max-age=60, public, s-maxage=60");

        let (status, _, _) = send(&h.app, "/_/old.png", &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(h.engine.calls(), 1);
        assert_eq!(h.store.put_count(), 1);
    }
}
