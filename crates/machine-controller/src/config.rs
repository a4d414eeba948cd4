use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use mcm_provider_hcloud::registry::ENDPOINT_ENV;
use mcm_provider_hcloud::waiter::{DEFAULT_INTERVAL, DEFAULT_MAX_RETRIES};

#[derive(Debug, thiserror::Error)]
#[error("{name} is invalid: {value:?}")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub hcloud_endpoint: Option<String>,
    /// Bearer key required on every driver call, if set.
    pub api_key: Option<String>,
    pub action_poll_interval: Duration,
    pub action_poll_retries: u32,
    pub request_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the config from `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            listen_addr: parse_or(&lookup, "LISTEN_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            hcloud_endpoint: non_empty(ENDPOINT_ENV),
            api_key: non_empty("DRIVER_API_KEY"),
            action_poll_interval: Duration::from_secs(parse_or(
                &lookup,
                "ACTION_POLL_INTERVAL_SECS",
                DEFAULT_INTERVAL.as_secs(),
            )?),
            action_poll_retries: parse_or(&lookup, "ACTION_POLL_RETRIES", DEFAULT_MAX_RETRIES)?,
            request_timeout: Duration::from_secs(parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 600)?),
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError { name, value }),
    }
}
