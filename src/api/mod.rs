use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::middleware::{auth, rate_limit};
use crate::AppState;

pub mod handlers;

/// Path prefix clients use to fetch a masked image.
pub const SECURE_IMAGE_PATH: &str = "/api/secure-image/";

/// Build the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    let public = Router::new()
        .route(
            "/generate-image",
            post(handlers::generate_image)
                .layer(from_fn_with_state(state.clone(), rate_limit::limit_generation)),
        )
        .route(
            "/secure-image/:token",
            get(handlers::secure_image)
                .layer(from_fn_with_state(state.clone(), rate_limit::limit_secure_image)),
        )
        .route_layer(from_fn_with_state(state.clone(), auth::require_api_secret))
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api", public)
        .fallback(fallback_404)
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors_origins))
        .layer(from_fn(crate::middleware::request_id_middleware))
        .layer(from_fn(crate::middleware::security_headers_middleware))
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
