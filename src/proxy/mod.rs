pub mod image;
pub mod origin;

use url::Url;

use crate::errors::AppError;
use crate::token::{log_prefix, TokenStore};

pub use image::{ImageFetcher, ImageStream};
pub use origin::OriginGate;

/// The token-gated indirection in one place: resolve, gate, fetch.
#[derive(Clone)]
pub struct SecureImages {
    pub tokens: TokenStore,
    pub gate: OriginGate,
    pub fetcher: ImageFetcher,
}

impl SecureImages {
    pub fn new(tokens: TokenStore, gate: OriginGate, fetcher: ImageFetcher) -> Self {
        Self {
            tokens,
            gate,
            fetcher,
        }
    }

    pub fn issue(&self, original_url: &str) -> Result<String, AppError> {
        Ok(self.tokens.issue(original_url)?)
    }

    /// Consume one use of `token` and return the upstream URL, provided its
    /// host is still on the allow-list.
    pub fn resolve(&self, token: &str) -> Result<Url, AppError> {
        let original_url = self.tokens.resolve(token).map_err(|e| {
            tracing::debug!(token = log_prefix(token), error = %e, "token rejected");
            AppError::from(e)
        })?;
        self.gate.check(&original_url)
    }

    pub async fn open(&self, token: &str) -> Result<ImageStream, AppError> {
        let url = self.resolve(token)?;
        self.fetcher.fetch_and_stream(&url).await
    }
}
