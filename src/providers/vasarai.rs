use async_trait::async_trait;
use serde_json::json;

use super::{GenerationRequest, ImageProvider, ProviderError};

/// VasarAI (Midjourney-style) generation. Returns a single CDN URL per call.
pub struct VasarAiProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl VasarAiProvider {
    pub fn new(client: reqwest::Client, url: String, api_key: String) -> Self {
        Self {
            client,
            url,
            api_key,
        }
    }
}

#[async_trait]
impl ImageProvider for VasarAiProvider {
    fn name(&self) -> &'static str {
        "vasarai"
    }

    async fn generate(
        &self,
        req: &GenerationRequest,
    ) -> Result<serde_json::Value, ProviderError> {
        let url = format!(
            "{}?message={}&style={}",
            self.url,
            urlencoding::encode(&req.prompt),
            urlencoding::encode(&req.style)
        );

        let resp = self
            .client
            .post(url)
            .header("accept", "application/json")
            .bearer_auth(&self.api_key)
            .body("")
            .send()
            .await?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("VasarAI returned invalid JSON: {}", e)))?;

        if !status.is_success() {
            let detail = data
                .get("detail")
                .and_then(|d| d.as_str())
                .unwrap_or("Unknown error");
            return Err(ProviderError::Rejected(format!(
                "VasarAI API error: {} - {}",
                status.as_u16(),
                detail
            )));
        }

        let cdn_url = data
            .get("cdn_url")
            .and_then(|u| u.as_str())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                ProviderError::InvalidResponse("No CDN URL returned from VasarAI API".into())
            })?;

        Ok(json!({
            "data": [{
                "url": cdn_url,
                "revised_prompt": req.prompt,
            }]
        }))
    }
}
