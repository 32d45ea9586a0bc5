//! Server configuration.
//!
//! Defaults can be overridden from JSON or from `POLLHTTP_*` environment
//! variables.

use std::net::{Ipv6Addr, SocketAddr};

use serde::Deserialize;
use thiserror::Error;

use crate::http::DecoderLimits;
use crate::reactor::Interval;

pub const ADDRESS_VAR: &str = "POLLHTTP_ADDRESS";
pub const POLL_INTERVAL_VAR: &str = "POLLHTTP_POLL_INTERVAL_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Settings for [`HttpServer`](crate::server::HttpServer).
///
/// # Examples
///
/// ```
/// use pollhttp::config::ServerConfig;
/// use pollhttp::reactor::Interval;
///
/// let config = ServerConfig::from_json(r#"{ "address": "127.0.0.1:3000", "poll_interval": 0 }"#).unwrap();
/// assert_eq!(config.address.port(), 3000);
/// assert_eq!(config.poll_interval, Interval::Immediate);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind; the family selects IPv4 or IPv6.
    pub address: SocketAddr,
    /// Longest a single reactor poll may block, in milliseconds.
    pub poll_interval: Interval,
    pub limits: DecoderLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from((Ipv6Addr::UNSPECIFIED, 8080)),
            poll_interval: Interval::default(),
            limits: DecoderLimits::default(),
        }
    }
}

impl ServerConfig {
    /// Parses a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Defaults overridden by `POLLHTTP_ADDRESS` and `POLLHTTP_POLL_INTERVAL_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = lookup(ADDRESS_VAR) {
            config.address = value.parse().map_err(|_| ConfigError::InvalidValue {
                key: ADDRESS_VAR,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(POLL_INTERVAL_VAR) {
            let ms: u32 = value.parse().map_err(|_| ConfigError::InvalidValue {
                key: POLL_INTERVAL_VAR,
                value: value.clone(),
            })?;
            config.poll_interval = Interval::from_millis(ms);
        }
        Ok(config)
    }
}
