use async_trait::async_trait;

use super::{GenerationRequest, ImageProvider, ProviderError};

/// Infip's OpenAI-compatible `/v1/images/generations` endpoint.
pub struct InfipProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl InfipProvider {
    pub fn new(client: reqwest::Client, url: String, api_key: String) -> Self {
        Self {
            client,
            url,
            api_key,
        }
    }
}

#[async_trait]
impl ImageProvider for InfipProvider {
    fn name(&self) -> &'static str {
        "infip"
    }

    async fn generate(
        &self,
        req: &GenerationRequest,
    ) -> Result<serde_json::Value, ProviderError> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(req)
            .send()
            .await?;

        let status = resp.status();
        let raw = resp.text().await?;
        let body: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|_| ProviderError::InvalidResponse("Invalid JSON from Infip API".into()))?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "infip rejected generation request");
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}
