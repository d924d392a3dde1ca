//! Host configuration

use std::str::FromStr;
use std::time::Duration;

use fjord_transport::{EngineConfig, MAX_CHANNELS, MAX_PEERS};
use serde::{Deserialize, Serialize};

use crate::error::{HostError, Result};

/// Configuration for a [`Host`](crate::Host).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Simultaneous connections the host accepts or initiates
    pub max_peers: usize,

    /// Channels offered per connection
    pub max_channels: usize,

    /// Incoming bandwidth in bytes/second (0 = unlimited)
    pub incoming_bandwidth: u32,

    /// Outgoing bandwidth in bytes/second (0 = unlimited)
    pub outgoing_bandwidth: u32,

    /// Deflate outgoing payloads
    pub enable_compression: bool,

    /// How long one service-thread iteration waits for an event
    pub service_timeout: Duration,

    /// Socket send/receive buffer size
    pub socket_buffer_size: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_peers: 32,
            max_channels: 1,
            incoming_bandwidth: 0,
            outgoing_bandwidth: 0,
            enable_compression: false,
            service_timeout: Duration::from_millis(10),
            socket_buffer_size: 256 * 1024,
        }
    }
}

impl HostConfig {
    /// Defaults overridden by `FJORD_*` environment variables.
    ///
    /// Recognised: `FJORD_MAX_PEERS`, `FJORD_MAX_CHANNELS`,
    /// `FJORD_INCOMING_BANDWIDTH`, `FJORD_OUTGOING_BANDWIDTH`,
    /// `FJORD_COMPRESSION`, `FJORD_SERVICE_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "FJORD_MAX_PEERS")? {
            config.max_peers = v;
        }
        if let Some(v) = parse_var(&lookup, "FJORD_MAX_CHANNELS")? {
            config.max_channels = v;
        }
        if let Some(v) = parse_var(&lookup, "FJORD_INCOMING_BANDWIDTH")? {
            config.incoming_bandwidth = v;
        }
        if let Some(v) = parse_var(&lookup, "FJORD_OUTGOING_BANDWIDTH")? {
            config.outgoing_bandwidth = v;
        }
        if let Some(raw) = lookup("FJORD_COMPRESSION") {
            config.enable_compression = parse_flag(&raw).ok_or_else(|| {
                HostError::InvalidConfig(format!("FJORD_COMPRESSION: expected a boolean, got {:?}", raw))
            })?;
        }
        if let Some(ms) = parse_var(&lookup, "FJORD_SERVICE_TIMEOUT_MS")? {
            config.service_timeout = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers;
        self
    }

    pub fn with_max_channels(mut self, max_channels: usize) -> Self {
        self.max_channels = max_channels;
        self
    }

    pub fn with_bandwidth(mut self, incoming: u32, outgoing: u32) -> Self {
        self.incoming_bandwidth = incoming;
        self.outgoing_bandwidth = outgoing;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.enable_compression = enabled;
        self
    }

    pub fn with_service_timeout(mut self, timeout: Duration) -> Self {
        self.service_timeout = timeout;
        self
    }

    pub fn with_socket_buffer_size(mut self, size: usize) -> Self {
        self.socket_buffer_size = size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_peers == 0 || self.max_peers > MAX_PEERS {
            return Err(HostError::InvalidConfig(format!(
                "max_peers must be in 1..={}, got {}",
                MAX_PEERS, self.max_peers
            )));
        }
        if self.max_channels == 0 || self.max_channels > MAX_CHANNELS {
            return Err(HostError::InvalidConfig(format!(
                "max_channels must be in 1..={}, got {}",
                MAX_CHANNELS, self.max_channels
            )));
        }
        if self.service_timeout.is_zero() {
            return Err(HostError::InvalidConfig(
                "service_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_peers: self.max_peers,
            max_channels: self.max_channels,
            incoming_bandwidth: self.incoming_bandwidth,
            outgoing_bandwidth: self.outgoing_bandwidth,
            enable_compression: self.enable_compression,
            socket_buffer_size: self.socket_buffer_size,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| HostError::InvalidConfig(format!("{}: {}", name, e)))
        })
        .transpose()
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = HostConfig::default();
        assert_eq!(config.max_peers, 32);
        assert_eq!(config.max_channels, 1);
        assert_eq!(config.incoming_bandwidth, 0);
        assert!(!config.enable_compression);
        assert_eq!(config.service_timeout, Duration::from_millis(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builders_chain() {
        let config = HostConfig::default()
            .with_max_peers(1)
            .with_max_channels(4)
            .with_bandwidth(1000, 2000)
            .with_compression(true);
        assert_eq!(config.max_peers, 1);
        assert_eq!(config.max_channels, 4);
        assert_eq!(config.outgoing_bandwidth, 2000);
        assert!(config.enable_compression);

        let engine = config.engine_config();
        assert_eq!(engine.max_channels, 4);
        assert_eq!(engine.incoming_bandwidth, 1000);
    }

    #[test]
    fn validate_rejects_limits() {
        assert!(HostConfig::default().with_max_peers(0).validate().is_err());
        assert!(HostConfig::default().with_max_peers(MAX_PEERS + 1).validate().is_err());
        assert!(HostConfig::default().with_max_channels(256).validate().is_err());
        assert!(HostConfig::default()
            .with_service_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn environment_overrides() {
        let config = HostConfig::from_lookup(lookup_from(&[
            ("FJORD_MAX_PEERS", "8"),
            ("FJORD_MAX_CHANNELS", " 3 "),
            ("FJORD_COMPRESSION", "yes"),
            ("FJORD_SERVICE_TIMEOUT_MS", "25"),
        ]))
        .unwrap();
        assert_eq!(config.max_peers, 8);
        assert_eq!(config.max_channels, 3);
        assert!(config.enable_compression);
        assert_eq!(config.service_timeout, Duration::from_millis(25));
        assert_eq!(config.outgoing_bandwidth, 0);
    }

    #[test]
    fn environment_errors() {
        let bad_number = HostConfig::from_lookup(lookup_from(&[("FJORD_MAX_PEERS", "lots")]));
        assert!(matches!(bad_number, Err(HostError::InvalidConfig(msg)) if msg.contains("FJORD_MAX_PEERS")));

        let bad_flag = HostConfig::from_lookup(lookup_from(&[("FJORD_COMPRESSION", "maybe")]));
        assert!(bad_flag.is_err());

        let out_of_range = HostConfig::from_lookup(lookup_from(&[("FJORD_MAX_CHANNELS", "0")]));
        assert!(out_of_range.is_err());
    }

    #[test]
    fn serde_fills_missing_fields() {
        let config: HostConfig = serde_json::from_str(r#"{"max_peers": 2}"#).unwrap();
        assert_eq!(config.max_peers, 2);
        assert_eq!(config.max_channels, 1);
    }
}
