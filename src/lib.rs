use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod config;
pub mod engine;
pub mod fetch;
pub mod handler;
pub mod headers;
pub mod request;
pub mod transform;

use crate::handler::RequestHandler;

/// Status text used when an error carries no more specific classification.
pub const DEFAULT_STATUS_TEXT: &str = "IPX_ERROR";

#[derive(Error, Debug)]
pub enum ImageKitError {
    #[error("Modifiers are missing: {0}")]
    MissingModifiers(String),
    #[error("Resource id is missing: {0}")]
    MissingId(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Cached object unreadable: {0}")]
    CacheObjectUnreadable(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    /// Failure reported by a transformation engine with its own status.
    #[error("{message}")]
    Engine {
        status: StatusCode,
        status_text: String,
        message: String,
    },
    #[error("Transformation error: {0}")]
    TransformError(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Internal server error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, ImageKitError>;

impl ImageKitError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ImageKitError::MissingModifiers(_)
            | ImageKitError::MissingId(_)
            | ImageKitError::InvalidArgument(_)
            | ImageKitError::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
            ImageKitError::Forbidden(_) => StatusCode::FORBIDDEN,
            ImageKitError::NotFound(_) | ImageKitError::CacheObjectUnreadable(_) => {
                StatusCode::NOT_FOUND
            }
            ImageKitError::NetworkError(_) => StatusCode::BAD_GATEWAY,
            ImageKitError::Engine { status, .. } => *status,
            ImageKitError::TransformError(_)
            | ImageKitError::Storage(_)
            | ImageKitError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn status_text(&self) -> &str {
        match self {
            ImageKitError::MissingModifiers(_) => "IPX_MISSING_MODIFIERS",
            ImageKitError::MissingId(_) => "IPX_MISSING_ID",
            ImageKitError::InvalidArgument(_) => "IPX_INVALID_MODIFIER",
            ImageKitError::UnsupportedFormat(_) => "IPX_UNSUPPORTED_FORMAT",
            ImageKitError::Forbidden(_) => "IPX_FORBIDDEN",
            ImageKitError::NotFound(_) => "IPX_FILE_NOT_FOUND",
            ImageKitError::CacheObjectUnreadable(_) => "IPX_CACHE_NOT_FOUND",
            ImageKitError::NetworkError(_) => "IPX_UPSTREAM_ERROR",
            ImageKitError::Engine { status_text, .. } if !status_text.is_empty() => {
                status_text.as_str()
            }
            _ => DEFAULT_STATUS_TEXT,
        }
    }

    /// Message placed in the JSON error envelope.
    pub fn envelope_message(&self) -> String {
        format!("[{}] [{}] {}", self.status_code().as_u16(), self.status_text(), self)
    }
}

impl IntoResponse for ImageKitError {
    fn into_response(self) -> Response {
        let body = json!({ "error": { "message": self.envelope_message() } });
        (self.status_code(), Json(body)).into_response()
    }
}

// ====================================================================================
// OBSERVABILITY
// ====================================================================================

/// Global metrics tracking
pub struct Metrics {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub cache_writes: AtomicU64,
    pub transforms: AtomicU64,
    pub errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_writes: AtomicU64::new(0),
            transforms: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    pub static ref METRICS: Metrics = Metrics::new();
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "imagekit-edge"
    }))
}

/// Metrics endpoint (Prometheus-compatible plain text)
async fn metrics_handler() -> impl IntoResponse {
    let hits = METRICS.cache_hits.load(Ordering::Relaxed);
    let misses = METRICS.cache_misses.load(Ordering::Relaxed);
    let writes = METRICS.cache_writes.load(Ordering::Relaxed);
    let transforms = METRICS.transforms.load(Ordering::Relaxed);
    let errors = METRICS.errors.load(Ordering::Relaxed);

    let metrics = format!(
        "# HELP imagekit_cache_hits_total Total number of external cache hits\n\
         # TYPE imagekit_cache_hits_total counter\n\
         imagekit_cache_hits_total {}\n\
         # HELP imagekit_cache_misses_total Total number of external cache misses\n\
         # TYPE imagekit_cache_misses_total counter\n\
         imagekit_cache_misses_total {}\n\
         # HELP imagekit_cache_writes_total Total number of external cache writes\n\
         # TYPE imagekit_cache_writes_total counter\n\
         imagekit_cache_writes_total {}\n\
         # HELP imagekit_transforms_total Total number of image transformations\n\
         # TYPE imagekit_transforms_total counter\n\
         imagekit_transforms_total {}\n\
         # HELP imagekit_errors_total Total number of failed requests\n\
         # TYPE imagekit_errors_total counter\n\
         imagekit_errors_total {}\n",
        hits, misses, writes, transforms, errors
    );

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        metrics,
    )
}

async fn image_handler(
    State(handler): State<Arc<RequestHandler>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    handler.handle(&uri, &headers).await
}

/// Builds the service router: observability endpoints plus the catch-all
/// `/<modifiers>/<resource-id>` image route.
pub fn router(handler: RequestHandler) -> Router {
    let state = Arc::new(handler);

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(image_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
