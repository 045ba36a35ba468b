use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::providers::ProviderError;
use crate::token::TokenError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("token not found")]
    TokenNotFound,

    #[error("token expired")]
    TokenExpired,

    #[error("token access limit exceeded")]
    AccessLimitExceeded,

    #[error("token store is full")]
    StoreFull,

    #[error("unauthorized origin")]
    UnauthorizedOrigin,

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream content is not an image")]
    NotAnImage,

    #[error("unauthorized")]
    Unauthorized,

    #[error("rate limit exceeded")]
    RateLimitExceeded {
        message: &'static str,
        retry_after_secs: u64,
    },

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::MalformedInput => AppError::MalformedInput("invalid token".into()),
            TokenError::NotFound => AppError::TokenNotFound,
            TokenError::Expired => AppError::TokenExpired,
            TokenError::AccessLimitExceeded => AppError::AccessLimitExceeded,
            TokenError::StoreFull => AppError::StoreFull,
            TokenError::ExpiryOutOfRange => {
                AppError::Internal(anyhow::anyhow!("token expiry is out of range"))
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::MalformedInput(m) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "malformed_input",
                m.clone(),
            ),
            AppError::TokenNotFound => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "token_not_found",
                "invalid or expired token".to_string(),
            ),
            AppError::TokenExpired => (
                StatusCode::GONE,
                "not_found_error",
                "token_expired",
                "token expired".to_string(),
            ),
            AppError::AccessLimitExceeded => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "access_limit_exceeded",
                "token access limit exceeded".to_string(),
            ),
            AppError::StoreFull => (
                StatusCode::SERVICE_UNAVAILABLE,
                "capacity_error",
                "token_store_full",
                "too many active images, try again later".to_string(),
            ),
            AppError::UnauthorizedOrigin => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "unauthorized_origin",
                "unauthorized domain".to_string(),
            ),
            AppError::UpstreamUnavailable(e) => {
                tracing::warn!("upstream image unavailable: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "upstream_unavailable",
                    "image not accessible".to_string(),
                )
            }
            AppError::NotAnImage => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "not_an_image",
                "not an image".to_string(),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "unauthorized",
                "unauthorized".to_string(),
            ),
            AppError::RateLimitExceeded { message, .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limit_error",
                "rate_limit_exceeded",
                message.to_string(),
            ),
            AppError::Provider(ProviderError::Status { status, body }) => {
                // Relay the provider's own status and payload untouched.
                let status =
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY);
                return (status, Json(body.clone())).into_response();
            }
            AppError::Provider(e) => {
                tracing::error!("image provider error: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "provider_failed",
                    e.to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        if let AppError::RateLimitExceeded {
            retry_after_secs, ..
        } = self
        {
            response
                .headers_mut()
                .insert("retry-after", HeaderValue::from(retry_after_secs));
        }

        response
    }
}
