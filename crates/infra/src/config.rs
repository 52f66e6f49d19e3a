//! Process configuration read from the environment.

use std::time::Duration;

use thiserror::Error;

use crate::outbox::OutboxDispatcherConfig;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} is not valid: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: usize,
    pub outbox_worker_name: String,
    /// `json` or `pretty`; interpreted by the observability crate.
    pub log_format: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        Ok(Self {
            database_url,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            outbox_poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "OUTBOX_POLL_INTERVAL_MS",
                1000,
            )?),
            outbox_batch_size: parse_or(&lookup, "OUTBOX_BATCH_SIZE", 100)?,
            outbox_worker_name: lookup("OUTBOX_WORKER_NAME")
                .unwrap_or_else(|| "outbox-dispatcher".to_string()),
            log_format: lookup("LOG_FORMAT")
                .map(|v| v.trim().to_ascii_lowercase())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "json".to_string()),
        })
    }

    pub fn dispatcher(&self) -> OutboxDispatcherConfig {
        OutboxDispatcherConfig::default()
            .with_name(self.outbox_worker_name.clone())
            .with_batch_size(self.outbox_batch_size)
            .with_poll_interval(self.outbox_poll_interval)
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + Default,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(v) if v > T::default() => Ok(v),
            _ => Err(ConfigError::Invalid { var, value: raw }),
        },
    }
}
