use std::collections::HashSet;

use url::Url;

use crate::errors::AppError;

/// Fixed allow-list of upstream hosts the proxy will fetch from.
///
/// Checked on every resolution, after the token is validated and before any
/// upstream request is made. Decisions are never cached.
#[derive(Debug, Clone)]
pub struct OriginGate {
    hosts: HashSet<String>,
}

impl OriginGate {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    pub fn is_allowed_origin(&self, url: &str) -> bool {
        self.check(url).is_ok()
    }

    /// Parse `url` and confirm its host is on the allow-list.
    pub fn check(&self, url: &str) -> Result<Url, AppError> {
        let parsed = Url::parse(url).map_err(|_| AppError::UnauthorizedOrigin)?;
        let host = parsed
            .host_str()
            .map(|h| h.to_ascii_lowercase())
            .ok_or(AppError::UnauthorizedOrigin)?;

        if self.hosts.contains(&host) {
            Ok(parsed)
        } else {
            tracing::warn!(host = %host, "blocked image fetch from unlisted host");
            Err(AppError::UnauthorizedOrigin)
        }
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(String::as_str)
    }
}
