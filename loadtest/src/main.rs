use goose::prelude::*;
use rand::Rng;

/// Load testing suite for the image delivery service.
///
/// Simulates production traffic against `/<modifiers>/<resource-id>` URLs:
/// - Fixed modifiers for a warm external cache (hit path)
/// - Randomized and time-derived modifiers (transform + write-through path)
/// - Conditional requests answered with 304
/// - Health monitoring endpoint
///
/// # Usage
/// ```bash
/// cd loadtest
/// cargo run --release -- --host http://localhost:3000 --users 10 --hatch-rate 2 --run-time 60s
/// ```
///
/// Set `LOADTEST_SOURCE` to a resource id the server can resolve (a file
/// under `IPX_FS_DIR` or a URL on an allowed host).
///
/// # Performance Targets
/// - Cache hits: <20ms p95 latency
/// - Cache misses: <200ms p95 latency (WebP) / <400ms (AVIF)
/// - Error rate: <1%

fn source() -> String {
    std::env::var("LOADTEST_SOURCE").unwrap_or_else(|_| "sample.jpg".to_string())
}

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    GooseAttack::initialize()?
        .register_scenario(
            scenario!("ImageDelivery")
                // Primary workload: varied transformations
                .register_transaction(transaction!(fetch_image).set_weight(10)?)
                // Browsers revalidating what they already hold
                .register_transaction(transaction!(revalidate_image).set_weight(3)?)
                .register_transaction(transaction!(health_check).set_weight(1)?)
        )
        .register_scenario(
            scenario!("CachePerformance")
                .register_transaction(transaction!(cached_image).set_weight(15)?)
                .register_transaction(transaction!(uncached_image).set_weight(5)?)
        )
        .execute()
        .await?;

    Ok(())
}

/// Requests a randomized transformation.
///
/// Parameter randomization spreads requests across fingerprints, giving a
/// realistic hit/miss mix once the store warms up.
async fn fetch_image(user: &mut GooseUser) -> TransactionResult {
    // Generate random parameters before await to satisfy Send bounds
    let url = {
        let mut rng = rand::thread_rng();
        let width = rng.gen_range(200..800);
        let height = rng.gen_range(200..800);
        let formats = ["webp", "jpeg", "avif", "auto"];
        let format = formats[rng.gen_range(0..formats.len())];

        format!("/w_{},h_{},f_{},q_80/{}", width, height, format, source())
    };

    let request = GooseRequest::builder()
        .set_request_builder(
            user.get_request_builder(&GooseMethod::Get, &url)?
                .header("Accept", "image/avif,image/webp,*/*"),
        )
        .build();
    let _goose = user.request(request).await?;

    Ok(())
}

/// Sends `If-Modified-Since` far in the future, which the server answers with
/// 304 before touching the cache or the engine.
async fn revalidate_image(user: &mut GooseUser) -> TransactionResult {
    let url = format!("/w_500,f_webp/{}", source());
    let request = GooseRequest::builder()
        .set_request_builder(
            user.get_request_builder(&GooseMethod::Get, &url)?
                .header("If-Modified-Since", "Fri, 01 Jan 2100 00:00:00 GMT"),
        )
        .build();
    let _goose = user.request(request).await?;

    Ok(())
}

/// Fixed modifiers: after warmup every request is an external cache hit.
async fn cached_image(user: &mut GooseUser) -> TransactionResult {
    let url = format!("/w_500,h_500,f_webp,q_80/{}", source());
    let _goose = user.get(&url).await?;

    Ok(())
}

/// Timestamp-derived dimensions guarantee fresh fingerprints.
async fn uncached_image(user: &mut GooseUser) -> TransactionResult {
    let timestamp = chrono::Utc::now().timestamp();
    let width = 200 + (timestamp % 100) as i32;
    let height = 200 + ((timestamp / 100) % 100) as i32;

    let url = format!("/w_{},h_{},f_webp,q_80/{}", width, height, source());
    let _goose = user.get(&url).await?;

    Ok(())
}

async fn health_check(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/health").await?;
    Ok(())
}
