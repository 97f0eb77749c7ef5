//! Streamgate configuration.

use std::time::Duration;

/// Environment variable holding the backend base URL.
pub const ENV_BACKEND_URL: &str = "STREAMGATE_BACKEND_URL";

/// Environment variable holding the backend's public (anon) API key.
pub const ENV_ANON_KEY: &str = "STREAMGATE_ANON_KEY";

/// Configuration for entitlement resolution and caching.
#[derive(Debug, Clone)]
pub struct StreamgateConfig {
    /// Base URL of the backend-as-a-service project (e.g., `https://xyz.example.co`).
    pub backend_url: String,

    /// Public API key sent in the `apikey` header on every backend call.
    pub anon_key: String,

    /// User-Agent product identifier (e.g., "catalog-web").
    pub user_agent_product: String,

    /// How often the resolver re-checks entitlements, and the minimum
    /// spacing between two non-forced resolutions.
    pub recheck_interval: Duration,

    /// Total backend attempts per resolution before giving up.
    pub max_attempts: u32,

    /// Fixed delay between attempts.
    pub retry_delay: Duration,

    /// Per-request HTTP timeout.
    pub request_timeout: Duration,

    /// Maximum number of cache entries.
    pub cache_capacity: usize,

    /// TTL used by `TtlCache::set` when no explicit TTL is given.
    pub cache_default_ttl: Duration,

    /// TTL of cached subscription status records.
    pub status_ttl: Duration,

    /// Interval of the background cache sweep.
    pub sweep_interval: Duration,
}

impl Default for StreamgateConfig {
    fn default() -> Self {
        Self {
            backend_url: String::new(),
            anon_key: String::new(),
            user_agent_product: "streamgate".to_string(),
            recheck_interval: Duration::from_secs(5 * 60),
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            cache_capacity: 100,
            cache_default_ttl: Duration::from_secs(5 * 60),
            status_ttl: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl StreamgateConfig {
    /// Build a configuration from `STREAMGATE_BACKEND_URL` and
    /// `STREAMGATE_ANON_KEY`, keeping defaults for everything else.
    pub fn from_env() -> Result<Self, crate::StreamgateError> {
        let backend_url = std::env::var(ENV_BACKEND_URL).map_err(|_| {
            crate::StreamgateError::ConfigError(format!("{} is not set", ENV_BACKEND_URL))
        })?;
        let anon_key = std::env::var(ENV_ANON_KEY).map_err(|_| {
            crate::StreamgateError::ConfigError(format!("{} is not set", ENV_ANON_KEY))
        })?;

        let config = Self {
            backend_url: backend_url.trim_end_matches('/').to_string(),
            anon_key,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<(), crate::StreamgateError> {
        if !self.backend_url.starts_with("http://") && !self.backend_url.starts_with("https://") {
            return Err(crate::StreamgateError::ConfigError(format!(
                "backend_url must be an http(s) URL, got {:?}",
                self.backend_url
            )));
        }
        if self.anon_key.is_empty() {
            return Err(crate::StreamgateError::ConfigError(
                "anon_key cannot be empty".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(crate::StreamgateError::ConfigError(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(crate::StreamgateError::ConfigError(
                "cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.recheck_interval.is_zero() || self.sweep_interval.is_zero() {
            return Err(crate::StreamgateError::ConfigError(
                "recheck_interval and sweep_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StreamgateError;

    fn valid() -> StreamgateConfig {
        StreamgateConfig {
            backend_url: "https://project.example.co".to_string(),
            anon_key: "anon".to_string(),
            ..StreamgateConfig::default()
        }
    }

    #[test]
    fn defaults_match_documented_constants() {
        let config = StreamgateConfig::default();
        assert_eq!(config.recheck_interval, Duration::from_secs(300));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn rejects_non_http_url() {
        let config = StreamgateConfig {
            backend_url: "project.example.co".to_string(),
            ..valid()
        };
        assert!(matches!(config.validate(), Err(StreamgateError::ConfigError(_))));
    }

    #[test]
    fn rejects_empty_anon_key() {
        let config = StreamgateConfig {
            anon_key: String::new(),
            ..valid()
        };
        assert!(matches!(config.validate(), Err(StreamgateError::ConfigError(_))));
    }

    #[test]
    fn rejects_zero_attempts_and_capacity() {
        let config = StreamgateConfig {
            max_attempts: 0,
            ..valid()
        };
        assert!(config.validate().is_err());

        let config = StreamgateConfig {
            cache_capacity: 0,
            ..valid()
        };
        assert!(config.validate().is_err());
    }
}
