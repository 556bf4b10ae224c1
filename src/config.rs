//! Environment-driven configuration (ambient stack): assembles
//! [`crate::dispatch::DispatcherConfig`] and the Postgres pool settings from
//! `DURABLE_*` environment variables, loading a `.env` file first via
//! `dotenvy` the way a small CLI binary embedding this crate would.

use std::time::Duration;

use crate::dispatch::DispatcherConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Postgres connection settings, read from `DATABASE_URL` plus pool sizing
/// knobs.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;
        let max_connections = parse_env_or("DURABLE_DB_MAX_CONNECTIONS", 10)?;
        Ok(Self { url, max_connections })
    }
}

/// Top-level runtime configuration: everything a dispatcher binary needs
/// besides the concrete store/queue handles it constructs from
/// `database`.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub database: DatabaseConfig,
    pub dispatcher: DispatcherConfig,
}

impl RuntimeConfig {
    /// Load `.env` (if present, ignoring a missing file) then read
    /// `DURABLE_*`/`DATABASE_URL` variables, falling back to
    /// [`DispatcherConfig::default`]'s values for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let defaults = DispatcherConfig::default();
        let dispatcher = DispatcherConfig {
            max_concurrent_orchestration_turns: parse_env_or(
                "DURABLE_MAX_CONCURRENT_ORCHESTRATION_TURNS",
                defaults.max_concurrent_orchestration_turns,
            )?,
            max_concurrent_activities: parse_env_or("DURABLE_MAX_CONCURRENT_ACTIVITIES", defaults.max_concurrent_activities)?,
            shutdown_timeout: parse_env_millis_or("DURABLE_SHUTDOWN_TIMEOUT_MS", defaults.shutdown_timeout)?,
            infra_retry_delay: parse_env_millis_or("DURABLE_INFRA_RETRY_DELAY_MS", defaults.infra_retry_delay)?,
        };

        Ok(Self { database: DatabaseConfig::from_env()?, dispatcher })
    }
}

fn parse_env_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

fn parse_env_millis_or(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_database_url_errors() {
        std::env::remove_var("DATABASE_URL");
        assert!(matches!(DatabaseConfig::from_env(), Err(ConfigError::Missing("DATABASE_URL"))));
    }

    #[test]
    fn invalid_numeric_override_errors() {
        std::env::set_var("DURABLE_DB_MAX_CONNECTIONS", "not-a-number");
        std::env::set_var("DATABASE_URL", "postgres://localhost/durable");
        let result = DatabaseConfig::from_env();
        std::env::remove_var("DURABLE_DB_MAX_CONNECTIONS");
        std::env::remove_var("DATABASE_URL");
        assert!(matches!(result, Err(ConfigError::Invalid { name: "DURABLE_DB_MAX_CONNECTIONS", .. })));
    }
}
