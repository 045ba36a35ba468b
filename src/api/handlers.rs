use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::SECURE_IMAGE_PATH;
use crate::errors::AppError;
use crate::providers::{GenerationRequest, ProviderError};
use crate::proxy::SecureImages;
use crate::token::log_prefix;
use crate::AppState;

pub const MAX_PROMPT_CHARS: usize = 1000;

// ── Request DTOs ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GenerateImageRequest {
    pub model: Option<String>,
    /// Kept loose so a non-string prompt gets the same error as a missing one.
    pub prompt: Option<Value>,
    #[serde(default = "default_n")]
    pub n: u32,
    #[serde(default = "default_response_format")]
    pub response_format: String,
    #[serde(default = "default_size")]
    pub size: String,
    #[serde(default = "default_style")]
    pub style: String,
}

fn default_n() -> u32 {
    1
}

fn default_response_format() -> String {
    "url".into()
}

fn default_size() -> String {
    "1024x1024".into()
}

fn default_style() -> String {
    "cinematic".into()
}

impl GenerateImageRequest {
    fn validate(self) -> Result<GenerationRequest, AppError> {
        let prompt = self
            .prompt
            .as_ref()
            .and_then(Value::as_str)
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| AppError::MalformedInput("Valid prompt is required".into()))?;

        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(AppError::MalformedInput(format!(
                "Prompt too long (max {} characters)",
                MAX_PROMPT_CHARS
            )));
        }

        Ok(GenerationRequest {
            prompt: prompt.trim().to_string(),
            model: self.model,
            n: self.n,
            response_format: self.response_format,
            size: self.size,
            style: self.style,
        })
    }
}

// ── Handlers ─────────────────────────────────────────────────

/// POST /api/generate-image
pub async fn generate_image(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GenerateImageRequest>,
) -> Result<Json<Value>, AppError> {
    let req = payload.validate()?;
    let provider = state.provider_for(req.model.as_deref());

    tracing::info!(
        model = req.model.as_deref().unwrap_or("default"),
        provider = provider.name(),
        "image generation requested"
    );

    let mut body = provider.generate(&req).await?;
    let masked = mask_image_urls(&state.images, &mut body)?;
    tracing::debug!(images = masked, "masked generated image urls");

    Ok(Json(body))
}

/// GET /api/secure-image/:token
pub async fn secure_image(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Response, AppError> {
    let image = state.images.open(&token).await?;
    tracing::debug!(
        token = log_prefix(&token),
        content_type = %image.content_type,
        "serving proxied image"
    );
    image.into_response(state.config.image_cache_max_age_secs)
}

/// GET /api/health
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "OK",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Replace every `data[].url` in a provider payload with a token-gated path
/// and add the bare `token` alongside it. Returns how many URLs were masked.
pub fn mask_image_urls(images: &SecureImages, body: &mut Value) -> Result<usize, AppError> {
    let Some(items) = body.get_mut("data").and_then(Value::as_array_mut) else {
        return Ok(0);
    };

    let mut masked = 0;
    for item in items.iter_mut() {
        let Some(obj) = item.as_object_mut() else {
            continue;
        };
        let Some(url) = obj
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
        else {
            continue;
        };

        let token = images.issue(&url).map_err(|e| match e {
            AppError::MalformedInput(_) => AppError::Provider(ProviderError::InvalidResponse(
                "provider returned an invalid image url".into(),
            )),
            other => other,
        })?;

        obj.insert(
            "url".into(),
            Value::String(format!("{}{}", SECURE_IMAGE_PATH, token)),
        );
        obj.insert("token".into(), Value::String(token));
        masked += 1;
    }
    Ok(masked)
}
