use crate::handlers::{images, meta, random, upload};
use crate::middleware::require_api_key;
use crate::state::AppState;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, header},
    middleware,
    routing::{get, post},
};
use imageflow_core::config::StorageConfig;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer, services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};

/// Generous ceiling for one multipart submission; the per-submission file
/// count is enforced separately.
const UPLOAD_BODY_LIMIT: usize = 200 * 1024 * 1024;

/// Assemble the full HTTP surface. `random`, `validate-api-key`, and (in
/// local mode) static image serving are public; everything else requires
/// the Bearer key.
pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/api/random", get(random::random_image))
        .route("/api/validate-api-key", post(meta::validate_api_key));

    let protected = Router::new()
        .route("/api/upload", post(upload::upload_images))
        .route("/api/images", get(images::list_images))
        .route("/api/delete-image", post(images::delete_image))
        .route("/api/tags", get(meta::list_tags))
        .route("/api/config", get(meta::client_config))
        .route("/api/trigger-cleanup", post(meta::trigger_cleanup))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    let mut router = Router::new()
        .merge(public)
        .merge(protected)
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Local blobs are served straight off disk with the same long-lived
    // caching the S3 backend advertises.
    if let StorageConfig::Local { root } = &state.config.storage {
        let assets = ServiceBuilder::new()
            .layer(SetResponseHeaderLayer::overriding(
                header::CACHE_CONTROL,
                HeaderValue::from_static("public, max-age=31536000"),
            ))
            .service(ServeDir::new(root));
        router = router.nest_service("/images", assets);
    }

    router.with_state(state)
}
