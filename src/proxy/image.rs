//! Streaming fetch of the real image behind a token.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use url::Url;

use crate::errors::AppError;

/// HTTP client for image hosts. Single attempt, bounded by `timeout`.
#[derive(Clone)]
pub struct ImageFetcher {
    client: reqwest::Client,
}

/// An upstream image response whose body has not been read yet.
pub struct ImageStream {
    pub content_type: String,
    pub content_length: Option<u64>,
    response: reqwest::Response,
}

impl ImageFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(32)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client })
    }

    pub async fn fetch_and_stream(&self, url: &Url) -> Result<ImageStream, AppError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "{} answered {}",
                url.host_str().unwrap_or_default(),
                status
            )));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(AppError::NotAnImage)?;
        if !content_type.to_ascii_lowercase().starts_with("image/") {
            return Err(AppError::NotAnImage);
        }

        Ok(ImageStream {
            content_type,
            content_length: response.content_length(),
            response,
        })
    }
}

impl ImageStream {
    /// Turn the upstream body into a streaming response for the client.
    pub fn into_response(self, cache_max_age: u64) -> Result<Response, AppError> {
        let stream = self.response.bytes_stream().map(|chunk: Result<Bytes, reqwest::Error>| {
            if let Err(e) = &chunk {
                tracing::warn!("image stream aborted: {}", e);
            }
            chunk
        });

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, self.content_type)
            .header(
                header::CACHE_CONTROL,
                format!("private, max-age={}", cache_max_age),
            )
            .header(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            );
        if let Some(len) = self.content_length {
            builder = builder.header(header::CONTENT_LENGTH, len);
        }

        builder
            .body(Body::from_stream(stream))
            .map_err(|e| AppError::Internal(e.into()))
    }
}
