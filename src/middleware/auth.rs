use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use crate::errors::AppError;
use crate::AppState;

/// Require `Authorization: Bearer <API_SECRET>` when a secret is configured.
pub async fn require_api_secret(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(secret) = state.config.api_secret.as_deref() {
        let presented = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !bearer_matches(presented, secret) {
            return Err(AppError::Unauthorized);
        }
    }
    Ok(next.run(req).await)
}

fn bearer_matches(header: &str, secret: &str) -> bool {
    match header.strip_prefix("Bearer ") {
        Some(token) => bool::from(token.as_bytes().ct_eq(secret.as_bytes())),
        None => false,
    }
}
