//! Redis transport configuration

use crate::{get_env_or_default, parse_env, ConfigError, ConfigResult};

/// Redis configuration for the realtime transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Optional password for Redis authentication
    pub password: Option<String>,

    /// Key and channel namespace, prepended to every pub/sub channel and presence hash
    pub namespace: String,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
}

impl RedisConfig {
    /// Load Redis configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let url = get_env_or_default("REDIS_URL", "redis://localhost:6379");
        if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
            return Err(ConfigError::InvalidUrl(
                "REDIS_URL".to_string(),
                "expected redis:// or rediss:// scheme".to_string(),
            ));
        }

        Ok(Self {
            url,
            password: std::env::var("REDIS_PASSWORD").ok().filter(|s| !s.is_empty()),
            namespace: get_env_or_default("REDIS_NAMESPACE", "lexiquiz:"),
            connect_timeout_secs: parse_env("REDIS_CONNECT_TIMEOUT", 5)?,
        })
    }

    /// Create a configuration with a custom URL (useful for testing)
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Build the full connection URL including password if set
    pub fn connection_url(&self) -> String {
        if let Some(ref password) = self.password {
            if let Some(at_pos) = self.url.find("://") {
                let (scheme, rest) = self.url.split_at(at_pos + 3);
                return format!("{}:{}@{}", scheme, password, rest);
            }
        }
        self.url.clone()
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            password: None,
            namespace: "lexiquiz:".to_string(),
            connect_timeout_secs: 5,
        }
    }
}
