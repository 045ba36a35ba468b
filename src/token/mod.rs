//! Opaque, time- and use-limited access tokens for upstream image URLs.
//!
//! A token is a bounded-reuse grant: it resolves to exactly one upstream URL
//! until it either expires or has been used `max_access` times.

pub mod clock;
pub mod store;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use store::TokenStore;

/// Longest token string we will even look up.
pub const MAX_TOKEN_LEN: usize = 128;

/// Random bytes per token (hex-encoded to twice as many characters).
pub const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Serialize)]
pub struct TokenRecord {
    pub original_url: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: u32,
    pub max_access: u32,
}

impl TokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_exhausted(&self) -> bool {
        self.access_count >= self.max_access
    }
}

/// Issuance policy applied to every new token.
#[derive(Debug, Clone, Copy)]
pub struct TokenPolicy {
    pub ttl: Duration,
    pub max_access: u32,
    /// Upper bound on live records held by the store.
    pub capacity: usize,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(30),
            max_access: 10,
            capacity: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("malformed input")]
    MalformedInput,

    #[error("invalid or expired token")]
    NotFound,

    #[error("token expired")]
    Expired,

    #[error("token access limit exceeded")]
    AccessLimitExceeded,

    #[error("token store is full")]
    StoreFull,

    #[error("token expiry is out of range")]
    ExpiryOutOfRange,
}

/// Prefix of a token that is safe to put in logs.
pub fn log_prefix(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    &token[..end]
}
