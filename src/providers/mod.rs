//! Third-party image generation APIs.
//!
//! Providers are opaque: each one takes a prompt and hands back an
//! OpenAI-style `{"data": [{"url": ...}, ...]}` payload. The URLs inside are
//! never shown to clients; the API layer swaps them for access tokens.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub mod infip;
pub mod vasarai;

pub use infip::InfipProvider;
pub use vasarai::VasarAiProvider;

/// A validated generation request.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub prompt: String,
    pub n: u32,
    pub response_format: String,
    pub size: String,
    #[serde(skip)]
    pub style: String,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider answered with a non-success status and a JSON body that
    /// should reach the client as-is.
    #[error("provider returned status {status}")]
    Status {
        status: u16,
        body: serde_json::Value,
    },

    #[error("{0}")]
    Rejected(String),

    #[error("{0}")]
    InvalidResponse(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(
        &self,
        req: &GenerationRequest,
    ) -> Result<serde_json::Value, ProviderError>;
}

/// Models served by VasarAI; everything else goes to Infip.
pub fn is_vasarai_model(model: Option<&str>) -> bool {
    matches!(model, Some("vasarai") | Some("midjourney"))
}
