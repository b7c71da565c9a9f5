//! Runtime configuration for bill actors.

use std::time::Duration;

use thiserror::Error;

pub const ENV_ACTIVITY_TIMEOUT_MS: &str = "FEES_ACTIVITY_TIMEOUT_MS";
pub const ENV_MAILBOX_CAPACITY: &str = "FEES_MAILBOX_CAPACITY";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Bill actor runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Upper bound for a single persistence gateway call.
    pub activity_timeout: Duration,
    /// Capacity of each per-kind command mailbox.
    pub mailbox_capacity: usize,
    /// Name for logging
    pub name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            activity_timeout: Duration::from_secs(10),
            mailbox_capacity: 64,
            name: "fees-runtime".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_activity_timeout(mut self, timeout: Duration) -> Self {
        self.activity_timeout = timeout;
        self
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity.max(1);
        self
    }

    /// Defaults overridden by `FEES_ACTIVITY_TIMEOUT_MS` / `FEES_MAILBOX_CAPACITY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_ACTIVITY_TIMEOUT_MS) {
            let ms = parse_positive(ENV_ACTIVITY_TIMEOUT_MS, &raw)?;
            config = config.with_activity_timeout(Duration::from_millis(ms));
        }
        if let Some(raw) = lookup(ENV_MAILBOX_CAPACITY) {
            let capacity = parse_positive(ENV_MAILBOX_CAPACITY, &raw)?;
            let capacity = usize::try_from(capacity).map_err(|_| ConfigError::Invalid {
                key: ENV_MAILBOX_CAPACITY,
                value: raw.clone(),
                reason: "does not fit in usize".to_string(),
            })?;
            config = config.with_mailbox_capacity(capacity);
        }

        Ok(config)
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: reason.to_string(),
    };
    let value: u64 = raw.trim().parse().map_err(|_| invalid("not an unsigned integer"))?;
    if value == 0 {
        return Err(invalid("must be greater than zero"));
    }
    Ok(value)
}
