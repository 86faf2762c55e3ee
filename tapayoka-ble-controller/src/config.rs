//! Process-wide transport configuration, read once at startup

use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

pub const ENV_TRANSPORT: &str = "TAPAYOKA_TRANSPORT";
pub const ENV_WS_DEVICE_URL: &str = "TAPAYOKA_WS_DEVICE_URL";
pub const ENV_SCAN_TIMEOUT_MS: &str = "TAPAYOKA_SCAN_TIMEOUT_MS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "TAPAYOKA_REQUEST_TIMEOUT_MS";
pub const ENV_TRUSTED_KEYS: &str = "TAPAYOKA_TRUSTED_KEYS";

pub const DEFAULT_WS_DEVICE_URL: &str = "ws://localhost:8765";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which transport backs the device operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Bluetooth Low Energy (production)
    #[default]
    Ble,
    /// WebSocket to a device or simulator (no radio hardware)
    Ws,
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ble" => Ok(Self::Ble),
            "ws" => Ok(Self::Ws),
            other => Err(Error::Config(format!(
                "unknown transport {other:?}, expected ble or ws"
            ))),
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ble => "ble",
            Self::Ws => "ws",
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub transport: TransportKind,
    /// Endpoint used by the WebSocket transport's scan
    pub ws_device_url: String,
    pub scan_timeout: Duration,
    /// How long the WebSocket correlator waits for a matching response
    pub request_timeout: Duration,
    /// Hex encoded Ed25519 public keys trusted to sign device info
    pub trusted_keys: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            ws_device_url: DEFAULT_WS_DEVICE_URL.to_string(),
            scan_timeout: DEFAULT_TIMEOUT,
            request_timeout: DEFAULT_TIMEOUT,
            trusted_keys: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, unset keys keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(transport) = lookup(ENV_TRANSPORT) {
            config.transport = transport.parse()?;
        }
        if let Some(url) = lookup(ENV_WS_DEVICE_URL) {
            config.ws_device_url = url;
        }
        if let Some(ms) = lookup(ENV_SCAN_TIMEOUT_MS) {
            config.scan_timeout = parse_millis(ENV_SCAN_TIMEOUT_MS, &ms)?;
        }
        if let Some(ms) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            config.request_timeout = parse_millis(ENV_REQUEST_TIMEOUT_MS, &ms)?;
        }
        if let Some(keys) = lookup(ENV_TRUSTED_KEYS) {
            config.trusted_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect();
        }

        Ok(config)
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| Error::Config(format!("{key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.transport, TransportKind::Ble);
        assert_eq!(config.ws_device_url, "ws://localhost:8765");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(config.trusted_keys.is_empty());
    }

    #[test]
    fn overrides() {
        let config = Config::from_lookup(lookup(&[
            (ENV_TRANSPORT, "WS"),
            (ENV_WS_DEVICE_URL, "ws://10.0.0.2:9000"),
            (ENV_REQUEST_TIMEOUT_MS, "250"),
            (ENV_TRUSTED_KEYS, "aa, bb,,"),
        ]))
        .unwrap();
        assert_eq!(config.transport, TransportKind::Ws);
        assert_eq!(config.ws_device_url, "ws://10.0.0.2:9000");
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert_eq!(config.trusted_keys, vec!["aa", "bb"]);
    }

    #[test]
    fn bad_values_are_errors() {
        assert!(Config::from_lookup(lookup(&[(ENV_TRANSPORT, "usb")])).is_err());
        assert!(Config::from_lookup(lookup(&[(ENV_SCAN_TIMEOUT_MS, "soon")])).is_err());
    }
}
