//! Settings types.
//!
//! Field names are camelCase on the wire. Every struct is
//! `#[serde(default)]`, so a settings file only needs the keys it changes:
//!
//! ```json
//! { "server": { "port": 9443 }, "broker": { "pairTimeoutSecs": 10 } }
//! ```

use std::time::Duration;

use rac_logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the gateway process.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// HTTP/WebSocket listener.
    pub server: ServerSettings,
    /// Pairing and relay behaviour.
    pub broker: BrokerSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// JSON catalog of providers, endpoints, outposts and tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_path: Option<String>,
}

impl GatewaySettings {
    /// Reject combinations that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;
        if s.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalSecs must be positive".into(),
            ));
        }
        if s.heartbeat_timeout_secs <= s.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeatTimeoutSecs ({}) must exceed heartbeatIntervalSecs ({})",
                s.heartbeat_timeout_secs, s.heartbeat_interval_secs
            )));
        }
        if s.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be positive".into(),
            ));
        }
        if self.broker.channel_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "broker.channelCapacity must be positive".into(),
            ));
        }
        if self.broker.subprotocol.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "broker.subprotocol must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port; 0 picks an ephemeral port.
    pub port: u16,
    /// Concurrent WebSocket connections accepted before answering 503.
    pub max_connections: usize,
    /// Largest accepted WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Seconds between pings on every WebSocket.
    pub heartbeat_interval_secs: u64,
    /// Seconds without a pong before a connection is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Seconds between sweeps of expired connection tokens.
    pub token_sweep_interval_secs: u64,
}

impl ServerSettings {
    /// Ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Pong deadline.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Token sweep period.
    pub fn token_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.token_sweep_interval_secs.max(1))
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            max_connections: 1024,
            max_message_size: 4 * 1024 * 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            token_sweep_interval_secs: 300,
        }
    }
}

/// Pairing and relay settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Seconds a client may wait for a worker to claim its offer. 0 waits
    /// forever.
    pub pair_timeout_secs: u64,
    /// Close immediately when no worker instance is registered.
    pub fail_fast_without_instances: bool,
    /// Inbound queue size of every fabric channel.
    pub channel_capacity: usize,
    /// WebSocket subprotocol negotiated with browser clients.
    pub subprotocol: String,
}

impl BrokerSettings {
    /// Pairing deadline, or `None` when disabled.
    pub fn pair_timeout(&self) -> Option<Duration> {
        (self.pair_timeout_secs > 0).then(|| Duration::from_secs(self.pair_timeout_secs))
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            pair_timeout_secs: 30,
            fail_fast_without_instances: true,
            channel_capacity: 100,
            subprotocol: "guacamole".to_string(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive, e.g. `info` or `rac_broker=debug,info`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
