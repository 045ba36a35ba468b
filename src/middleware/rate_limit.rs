use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;

use crate::errors::AppError;
use crate::AppState;

pub const GENERATE_MESSAGE: &str = "You can only generate 1 image every 3 seconds. Please wait.";
pub const SECURE_IMAGE_MESSAGE: &str = "Too many requests, please slow down.";

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u64,
}

/// In-process fixed-window rate limiter keyed by client.
///
/// Each key gets `max_requests` hits per `window`; the window restarts on the
/// first hit after it elapses. `max_requests == 0` disables the limiter.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, Window>>,
    max_requests: u64,
    window: Duration,
    message: &'static str,
}

impl RateLimiter {
    pub fn new(max_requests: u64, window: Duration, message: &'static str) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            max_requests,
            window,
            message,
        }
    }

    pub fn check(&self, key: &str) -> Result<(), AppError> {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> Result<(), AppError> {
        if self.max_requests == 0 {
            return Ok(());
        }

        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        let w = entry.value_mut();
        if now.saturating_duration_since(w.started) >= self.window {
            w.started = now;
            w.count = 0;
        }

        if w.count >= self.max_requests {
            let remaining = self.window.saturating_sub(now.saturating_duration_since(w.started));
            let retry_after_secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            tracing::warn!(
                rate_limit = true,
                client = key,
                limit = self.max_requests,
                "rate limit exceeded"
            );
            return Err(AppError::RateLimitExceeded {
                message: self.message,
                retry_after_secs: retry_after_secs.max(1),
            });
        }

        w.count += 1;
        Ok(())
    }

    /// Drop windows that have fully elapsed. Returns how many were removed.
    pub fn evict_stale(&self) -> usize {
        self.evict_stale_at(Instant::now())
    }

    pub fn evict_stale_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

/// Client identity for rate limiting: the peer address, or the first
/// `x-forwarded-for` hop when the deployment sits behind a trusted proxy.
pub fn client_key(req: &Request, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        if let Some(forwarded) = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return forwarded.to_string();
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn limit_generation(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    state
        .generation_limiter
        .check(&client_key(&req, state.config.trust_forwarded_for))?;
    Ok(next.run(req).await)
}

pub async fn limit_secure_image(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    state
        .secure_image_limiter
        .check(&client_key(&req, state.config.trust_forwarded_for))?;
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_one_request_per_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(3), GENERATE_MESSAGE);
        let t0 = Instant::now();

        assert!(limiter.check_at("1.2.3.4", t0).is_ok());
        match limiter.check_at("1.2.3.4", t0 + Duration::from_millis(500)) {
            Err(AppError::RateLimitExceeded {
                message,
                retry_after_secs,
            }) => {
                assert_eq!(message, GENERATE_MESSAGE);
                assert_eq!(retry_after_secs, 3);
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
        // Different client is unaffected.
        assert!(limiter.check_at("5.6.7.8", t0).is_ok());
        // Window rolls over.
        assert!(limiter.check_at("1.2.3.4", t0 + Duration::from_secs(3)).is_ok());
    }

    #[test]
    fn test_counts_up_to_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60), SECURE_IMAGE_MESSAGE);
        let t0 = Instant::now();
        for _ in 0..3 {
            assert!(limiter.check_at("c", t0).is_ok());
        }
        assert!(limiter.check_at("c", t0).is_err());
    }

    #[test]
    fn test_zero_disables() {
        let limiter = RateLimiter::new(0, Duration::from_secs(1), GENERATE_MESSAGE);
        for _ in 0..100 {
            assert!(limiter.check("c").is_ok());
        }
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_evict_stale_windows() {
        let limiter = RateLimiter::new(5, Duration::from_secs(10), GENERATE_MESSAGE);
        let t0 = Instant::now();
        limiter.check_at("old", t0).unwrap();
        limiter.check_at("new", t0 + Duration::from_secs(8)).unwrap();

        assert_eq!(limiter.evict_stale_at(t0 + Duration::from_secs(12)), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    fn peer(ip: [u8; 4]) -> ConnectInfo<SocketAddr> {
        ConnectInfo(SocketAddr::from((ip, 4000)))
    }

    #[test]
    fn test_client_key_ignores_forwarded_for_by_default() {
        let mut req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut().insert(peer([192, 0, 2, 1]));
        assert_eq!(client_key(&req, false), "192.0.2.1");

        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_key(&req, false), "unknown");
    }

    #[test]
    fn test_client_key_uses_forwarded_for_when_trusted() {
        let mut req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut().insert(peer([192, 0, 2, 1]));
        assert_eq!(client_key(&req, true), "203.0.113.7");

        let mut req = Request::builder().body(Body::empty()).unwrap();
        req.extensions_mut().insert(peer([192, 0, 2, 1]));
        assert_eq!(client_key(&req, true), "192.0.2.1");
    }
}
