use imagekit_edge::cache::ExternalCache;
use imagekit_edge::config::EdgeConfig;
use imagekit_edge::engine::LocalEngine;
use imagekit_edge::handler::RequestHandler;
use imagekit_edge::router;
use std::net::SocketAddr;
use std::sync::Arc;

/// Image delivery server entry point.
///
/// Reads configuration from the environment, wires the local transformation
/// engine to the external cache and serves `/<modifiers>/<resource-id>`.
///
/// # Configuration
/// Environment variables:
/// - `IPX_FS_DIR`, `IPX_FS_MAX_AGE`: local source directory and its max-age
/// - `IPX_HTTP_DOMAINS`, `IPX_HTTP_MAX_AGE`: allowed remote hosts and their max-age
/// - `S3_ENDPOINT`, `S3_PORT`, `S3_USE_SSL`, `S3_REGION`, `S3_ACCESS_KEY`,
///   `S3_SECRET_KEY`, `S3_BUCKET`: external cache store (disabled when
///   credentials or bucket are missing)
/// - `PORT`: HTTP listen port (default: 3000)
/// - `RUST_LOG`: Logging verbosity (default: "imagekit_edge=debug,tower_http=debug")
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imagekit_edge=debug,tower_http=debug".into()),
        )
        .init();

    tracing::info!("Starting image delivery server");

    let cfg = EdgeConfig::from_env()?;
    cfg.validate()?;

    let engine = Arc::new(LocalEngine::new(&cfg));
    let cache = ExternalCache::from_config(cfg.store.as_ref()).await;
    let handler = RequestHandler::new(engine, cache, cfg.fs.dir.clone());
    let app = router(handler);

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse::<u16>()
        .unwrap_or(3000);

    // 0.0.0.0 so containers accept external connections
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
