//! Shared configuration types for lexiquiz services
//!
//! This crate provides the configuration used by the quiz-session
//! synchronization core and the binaries built on it, loaded from
//! environment variables with development-friendly defaults.

mod database;
mod error;
mod redis;
mod sync;

pub use database::DatabaseConfig;
pub use error::{ConfigError, ConfigResult};
pub use redis::RedisConfig;
pub use sync::{SyncConfig, DEFAULT_COUNTDOWN_SECS, DEFAULT_GUARD_BUFFER_SECS};

use std::env;

/// Configuration shared between all services
#[derive(Debug, Clone)]
pub struct CommonConfig {
    /// Session synchronization settings
    pub sync: SyncConfig,

    /// Redis transport configuration
    pub redis: RedisConfig,

    /// Session store configuration (None when no database is configured)
    pub database: Option<DatabaseConfig>,

    /// Environment mode (development, staging, production)
    pub environment: Environment,
}

/// Application environment mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl std::str::FromStr for Environment {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "staging" | "stage" => Self::Staging,
            _ => Self::Development,
        })
    }
}

impl Environment {
    /// Check if this is a production environment
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Check if this is a development environment
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Staging => write!(f, "staging"),
            Self::Production => write!(f, "production"),
        }
    }
}

impl CommonConfig {
    /// Load common configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let environment: Environment = get_env_or_default("ENVIRONMENT", "development")
            .parse()
            .unwrap_or_default();
        let redis = RedisConfig::from_env()?;

        if environment.is_production() && redis.password.is_none() {
            return Err(ConfigError::ValidationError(
                "REDIS_PASSWORD is required in production".to_string(),
            ));
        }

        Ok(Self {
            sync: SyncConfig::from_env()?,
            redis,
            database: DatabaseConfig::from_env_optional()?,
            environment,
        })
    }

    /// Check if a session store database is configured
    pub fn has_database(&self) -> bool {
        self.database.is_some()
    }
}

/// Helper function to get a required environment variable
pub fn get_required_env(name: &str) -> ConfigResult<String> {
    env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

/// Helper function to get an optional environment variable with a default
pub fn get_env_or_default(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Helper function to parse an environment variable into a specific type
pub fn parse_env<T>(name: &str, default: T) -> ConfigResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}
