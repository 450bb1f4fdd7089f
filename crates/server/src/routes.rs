//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    // Multipart bodies are capped at the configured upload size instead of
    // axum's 2 MB default.
    let upload_limit =
        usize::try_from(state.config.server.max_upload_size).unwrap_or(usize::MAX);

    let api_routes = Router::new()
        .route("/v1/capabilities", get(handlers::get_capabilities))
        .route("/v1/health", get(handlers::health_check))
        // Upload lifecycle
        .route("/v1/uploads", post(handlers::begin_upload))
        .route(
            "/v1/uploads/{upload_id}",
            post(handlers::upload_file)
                .layer(DefaultBodyLimit::max(upload_limit))
                .get(handlers::get_upload_progress),
        )
        // Committed files
        .route("/v1/files", get(handlers::list_files))
        .route("/v1/updates", get(handlers::get_updates))
        .route("/files/{file_id}", get(handlers::download_file));

    let mut router = Router::new().merge(api_routes);

    // When enabled, this endpoint should be network-restricted to the
    // Prometheus scraper.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
