//! Image gateway: forwards image-generation requests to third-party APIs and
//! hides the resulting URLs behind short-lived, use-limited access tokens.

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod middleware;
pub mod providers;
pub mod proxy;
pub mod token;

use std::sync::Arc;
use std::time::Duration;

use middleware::rate_limit::{RateLimiter, GENERATE_MESSAGE, SECURE_IMAGE_MESSAGE};
use providers::{ImageProvider, InfipProvider, VasarAiProvider};
use proxy::{ImageFetcher, OriginGate, SecureImages};
use token::{Clock, SystemClock, TokenStore};

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: config::Config,
    pub images: SecureImages,
    pub infip: Arc<dyn ImageProvider>,
    pub vasarai: Arc<dyn ImageProvider>,
    pub generation_limiter: RateLimiter,
    pub secure_image_limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: config::Config) -> anyhow::Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: config::Config, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        config.validate()?;

        let images = SecureImages::new(
            TokenStore::with_clock(config.token_policy(), clock),
            OriginGate::new(&config.allowed_image_hosts),
            ImageFetcher::new(config.image_fetch_timeout())?,
        );

        let generation_client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(config.generation_timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        let infip: Arc<dyn ImageProvider> = Arc::new(InfipProvider::new(
            generation_client.clone(),
            config.infip_api_url.clone(),
            config.infip_api_key.clone(),
        ));
        let vasarai: Arc<dyn ImageProvider> = Arc::new(VasarAiProvider::new(
            generation_client,
            config.vasarai_api_url.clone(),
            config.vasarai_api_key.clone(),
        ));

        let generation_limiter = RateLimiter::new(
            config.generate_rate_limit,
            Duration::from_secs(config.generate_rate_window_secs),
            GENERATE_MESSAGE,
        );
        let secure_image_limiter = RateLimiter::new(
            config.secure_image_rate_limit,
            Duration::from_secs(config.secure_image_rate_window_secs),
            SECURE_IMAGE_MESSAGE,
        );

        Ok(Self {
            config,
            images,
            infip,
            vasarai,
            generation_limiter,
            secure_image_limiter,
        })
    }

    /// Provider that serves `model`.
    pub fn provider_for(&self, model: Option<&str>) -> &Arc<dyn ImageProvider> {
        if providers::is_vasarai_model(model) {
            &self.vasarai
        } else {
            &self.infip
        }
    }
}
