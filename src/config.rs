use std::str::FromStr;
use std::time::Duration;

use crate::token::TokenPolicy;

pub const DEFAULT_INFIP_API_URL: &str = "https://api.infip.pro/v1/images/generations";
pub const DEFAULT_VASARAI_API_URL: &str =
    "https://midapi.vasarai.net/api/v1/images/generate-image";

/// Longest token lifetime accepted from configuration.
pub const MAX_TOKEN_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Lifetime of an image token, in seconds.
    pub token_ttl_secs: u64,
    /// How many times one token may be resolved.
    pub token_max_access: u32,
    /// Maximum number of live tokens held in memory.
    pub token_store_capacity: usize,
    /// Interval of the background expiry sweep.
    pub sweep_interval_secs: u64,
    /// Hosts the secure-image route may fetch from.
    pub allowed_image_hosts: Vec<String>,
    pub image_fetch_timeout_secs: u64,
    /// `max-age` sent with proxied images (always `private`).
    pub image_cache_max_age_secs: u64,
    pub generation_timeout_secs: u64,
    pub infip_api_url: String,
    pub infip_api_key: String,
    pub vasarai_api_url: String,
    pub vasarai_api_key: String,
    /// Shared bearer secret for the public routes. `None` leaves them open.
    pub api_secret: Option<String>,
    pub cors_origins: Vec<String>,
    /// Key rate limits on the first `x-forwarded-for` hop instead of the peer
    /// address. Only safe behind a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
    pub generate_rate_limit: u64,
    pub generate_rate_window_secs: u64,
    pub secure_image_rate_limit: u64,
    pub secure_image_rate_window_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            token_ttl_secs: 30 * 60,
            token_max_access: 10,
            token_store_capacity: 100_000,
            sweep_interval_secs: 60,
            allowed_image_hosts: vec!["api.infip.pro".into(), "cdn.snapzion.com".into()],
            image_fetch_timeout_secs: 10,
            image_cache_max_age_secs: 3600,
            generation_timeout_secs: 120,
            infip_api_url: DEFAULT_INFIP_API_URL.into(),
            infip_api_key: String::new(),
            vasarai_api_url: DEFAULT_VASARAI_API_URL.into(),
            vasarai_api_key: String::new(),
            api_secret: None,
            cors_origins: vec![
                "http://localhost:8080".into(),
                "http://localhost:3000".into(),
            ],
            trust_forwarded_for: false,
            generate_rate_limit: 1,
            generate_rate_window_secs: 3,
            secure_image_rate_limit: 100,
            secure_image_rate_window_secs: 60,
        }
    }
}

impl Config {
    pub fn token_policy(&self) -> TokenPolicy {
        TokenPolicy {
            ttl: chrono::Duration::seconds(self.token_ttl_secs as i64),
            max_access: self.token_max_access,
            capacity: self.token_store_capacity,
        }
    }

    pub fn image_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.image_fetch_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.token_ttl_secs == 0 {
            anyhow::bail!("TOKEN_TTL_SECS must be greater than zero");
        }
        if self.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            anyhow::bail!(
                "TOKEN_TTL_SECS must be at most {} (one year)",
                MAX_TOKEN_TTL_SECS
            );
        }
        if self.token_max_access == 0 {
            anyhow::bail!("TOKEN_MAX_ACCESS must be at least 1");
        }
        if self.token_store_capacity == 0 {
            anyhow::bail!("TOKEN_STORE_CAPACITY must be at least 1");
        }
        if self.sweep_interval_secs == 0 {
            anyhow::bail!("SWEEP_INTERVAL_SECS must be greater than zero");
        }
        if self.allowed_image_hosts.is_empty() {
            anyhow::bail!("ALLOWED_IMAGE_HOSTS must name at least one host");
        }
        if self.image_fetch_timeout_secs == 0 {
            anyhow::bail!("IMAGE_FETCH_TIMEOUT_SECS must be greater than zero");
        }
        if self.generation_timeout_secs == 0 {
            anyhow::bail!("GENERATION_TIMEOUT_SECS must be greater than zero");
        }
        if self.generate_rate_window_secs == 0 || self.secure_image_rate_window_secs == 0 {
            anyhow::bail!("rate limit windows must be greater than zero");
        }
        Ok(())
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build a config from an arbitrary variable source (the process environment
/// in production, a map in tests).
pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();
    let parsed = |key: &str, default| parse_or(&lookup, key, default);

    let cfg = Config {
        port: match lookup("IMAGE_GATEWAY_PORT") {
            Some(_) => parse_or(&lookup, "IMAGE_GATEWAY_PORT", defaults.port)?,
            None => parse_or(&lookup, "PORT", defaults.port)?,
        },
        token_ttl_secs: parsed("TOKEN_TTL_SECS", defaults.token_ttl_secs)?,
        token_max_access: parse_or(&lookup, "TOKEN_MAX_ACCESS", defaults.token_max_access)?,
        token_store_capacity: parse_or(
            &lookup,
            "TOKEN_STORE_CAPACITY",
            defaults.token_store_capacity,
        )?,
        sweep_interval_secs: parsed("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
        allowed_image_hosts: lookup("ALLOWED_IMAGE_HOSTS")
            .map(|v| split_list(&v))
            .unwrap_or(defaults.allowed_image_hosts),
        image_fetch_timeout_secs: parsed(
            "IMAGE_FETCH_TIMEOUT_SECS",
            defaults.image_fetch_timeout_secs,
        )?,
        image_cache_max_age_secs: parsed(
            "IMAGE_CACHE_MAX_AGE_SECS",
            defaults.image_cache_max_age_secs,
        )?,
        generation_timeout_secs: parsed(
            "GENERATION_TIMEOUT_SECS",
            defaults.generation_timeout_secs,
        )?,
        infip_api_url: lookup("INFIP_API_URL").unwrap_or(defaults.infip_api_url),
        infip_api_key: lookup("INFIP_API_KEY").unwrap_or_default(),
        vasarai_api_url: lookup("VASARAI_API_URL").unwrap_or(defaults.vasarai_api_url),
        vasarai_api_key: lookup("VASARAI_API_KEY").unwrap_or_default(),
        api_secret: lookup("API_SECRET").filter(|s| !s.trim().is_empty()),
        cors_origins: lookup("CORS_ORIGINS")
            .map(|v| split_list(&v))
            .unwrap_or(defaults.cors_origins),
        trust_forwarded_for: parse_or(
            &lookup,
            "TRUST_FORWARDED_FOR",
            defaults.trust_forwarded_for,
        )?,
        generate_rate_limit: parsed("GENERATE_RATE_LIMIT", defaults.generate_rate_limit)?,
        generate_rate_window_secs: parsed(
            "GENERATE_RATE_WINDOW_SECS",
            defaults.generate_rate_window_secs,
        )?,
        secure_image_rate_limit: parsed(
            "SECURE_IMAGE_RATE_LIMIT",
            defaults.secure_image_rate_limit,
        )?,
        secure_image_rate_window_secs: parsed(
            "SECURE_IMAGE_RATE_WINDOW_SECS",
            defaults.secure_image_rate_window_secs,
        )?,
    };

    cfg.validate()?;
    Ok(cfg)
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid value for {}: {:?}", key, raw)),
        _ => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults_match_original_service() {
        let cfg = from_map(&[]).unwrap();
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.token_ttl_secs, 1800);
        assert_eq!(cfg.token_max_access, 10);
        assert_eq!(cfg.allowed_image_hosts, vec!["api.infip.pro", "cdn.snapzion.com"]);
        assert!(cfg.api_secret.is_none());
        assert_eq!(cfg.token_policy().ttl, chrono::Duration::minutes(30));
    }

    #[test]
    fn test_overrides_and_lists() {
        let cfg = from_map(&[
            ("TOKEN_TTL_SECS", "60"),
            ("TOKEN_MAX_ACCESS", "3"),
            ("ALLOWED_IMAGE_HOSTS", " a.example.com , ,b.example.com"),
            ("API_SECRET", "s3cret"),
        ])
        .unwrap();
        assert_eq!(cfg.token_ttl_secs, 60);
        assert_eq!(cfg.token_max_access, 3);
        assert_eq!(cfg.allowed_image_hosts, vec!["a.example.com", "b.example.com"]);
        assert_eq!(cfg.api_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_invalid_values_fail() {
        assert!(from_map(&[("TOKEN_TTL_SECS", "0")]).is_err());
        assert!(from_map(&[("TOKEN_MAX_ACCESS", "0")]).is_err());
        assert!(from_map(&[("TOKEN_MAX_ACCESS", "ten")]).is_err());
        assert!(from_map(&[("ALLOWED_IMAGE_HOSTS", ",")]).is_err());
    }

    #[test]
    fn test_ttl_beyond_a_year_rejected() {
        assert!(from_map(&[("TOKEN_TTL_SECS", "10000000000000")]).is_err());
        assert!(from_map(&[("TOKEN_TTL_SECS", "31536001")]).is_err());
        let cfg = from_map(&[("TOKEN_TTL_SECS", "31536000")]).unwrap();
        assert_eq!(cfg.token_policy().ttl, chrono::Duration::days(365));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        assert!(from_map(&[("IMAGE_FETCH_TIMEOUT_SECS", "0")]).is_err());
        assert!(from_map(&[("GENERATION_TIMEOUT_SECS", "0")]).is_err());
    }

    #[test]
    fn test_port_falls_back_to_plain_port() {
        assert_eq!(from_map(&[("PORT", "8080")]).unwrap().port, 8080);
        let cfg = from_map(&[("PORT", "8080"), ("IMAGE_GATEWAY_PORT", "9090")]).unwrap();
        assert_eq!(cfg.port, 9090);
        assert!(from_map(&[("PORT", "http")]).is_err());
    }

    #[test]
    fn test_forwarded_for_is_opt_in() {
        assert!(!from_map(&[]).unwrap().trust_forwarded_for);
        assert!(from_map(&[("TRUST_FORWARDED_FOR", "true")]).unwrap().trust_forwarded_for);
        assert!(from_map(&[("TRUST_FORWARDED_FOR", "maybe")]).is_err());
    }

    #[test]
    fn test_blank_secret_means_open() {
        let cfg = from_map(&[("API_SECRET", "  ")]).unwrap();
        assert!(cfg.api_secret.is_none());
    }
}
