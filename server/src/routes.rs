use axum::{extract::DefaultBodyLimit, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::share::{download, upload};
use crate::state::AppState;

/// Room for multipart boundaries and the small text fields next to the file.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build the full axum Router with all routes and middleware.
///
/// Must be served with `into_make_service_with_connect_info::<SocketAddr>()`
/// so the upload rate limiter can key on the peer IP.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting: uploads_per_minute per IP, with a burst of the same size
    let replenish_ms = (60_000 / u64::from(state.uploads_per_minute.max(1))).max(1);
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_millisecond(replenish_ms)
            .burst_size(state.uploads_per_minute.max(1))
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    let upload_routes = Router::new()
        .route("/upload", axum::routing::post(upload::upload_file))
        .layer(DefaultBodyLimit::max(
            state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES),
        ))
        .layer(GovernorLayer {
            config: governor_config,
        });

    let download_routes = Router::new().route(
        "/download/{token}",
        axum::routing::get(download::download_file),
    );

    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(upload_routes)
        .merge(download_routes)
        .merge(health)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
