//! API process configuration.

use std::time::Duration;

use thiserror::Error;

use fees_infra::{ConfigError, RuntimeConfig};

pub const ENV_BIND_ADDR: &str = "FEES_BIND_ADDR";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

#[derive(Debug, Error)]
pub enum ApiConfigError {
    #[error(transparent)]
    Runtime(#[from] ConfigError),
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    /// Postgres gateway when set, in-memory tables otherwise.
    pub database_url: Option<String>,
    /// How long `POST /bills/:id/close` waits for the final snapshot.
    pub close_wait: Duration,
    pub runtime: RuntimeConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            close_wait: Duration::from_secs(10),
            runtime: RuntimeConfig::default().with_name("fees-api"),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ApiConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ApiConfigError> {
        let defaults = Self::default();
        let runtime = RuntimeConfig::from_lookup(&lookup)?.with_name(defaults.runtime.name.clone());

        Ok(Self {
            bind_addr: lookup(ENV_BIND_ADDR)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.bind_addr),
            database_url: lookup(ENV_DATABASE_URL).filter(|v| !v.trim().is_empty()),
            close_wait: defaults.close_wait,
            runtime,
        })
    }

    pub fn with_close_wait(mut self, wait: Duration) -> Self {
        self.close_wait = wait;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_in_memory_gateway() {
        let config = ApiConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert!(config.database_url.is_none());
        assert_eq!(config.runtime.name, "fees-api");
    }

    #[test]
    fn blank_database_url_is_ignored() {
        let config = ApiConfig::from_lookup(|key| match key {
            ENV_DATABASE_URL => Some("  ".to_string()),
            ENV_BIND_ADDR => Some("127.0.0.1:9000".to_string()),
            _ => None,
        })
        .unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
    }
}
