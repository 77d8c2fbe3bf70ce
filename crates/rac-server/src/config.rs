//! Server configuration.

use std::time::Duration;

use rac_broker::SessionConfig;
use rac_settings::GatewaySettings;
use serde::{Deserialize, Serialize};

/// Configuration for the gateway listener.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Seconds between expired-token sweeps.
    pub token_sweep_interval_secs: u64,
    /// Queue size of every fabric channel.
    pub channel_capacity: usize,
    /// Subprotocol offered to browser clients.
    pub subprotocol: String,
}

impl ServerConfig {
    /// Listener configuration from loaded settings.
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        let s = &settings.server;
        Self {
            host: s.host.clone(),
            port: s.port,
            max_connections: s.max_connections,
            max_message_size: s.max_message_size,
            token_sweep_interval_secs: s.token_sweep_interval_secs,
            channel_capacity: settings.broker.channel_capacity,
            subprotocol: settings.broker.subprotocol.clone(),
        }
    }

    /// `host:port`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Token sweep period.
    pub fn token_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.token_sweep_interval_secs.max(1))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            max_message_size: 4 * 1024 * 1024,
            token_sweep_interval_secs: 300,
            channel_capacity: 100,
            subprotocol: "guacamole".into(),
        }
    }
}

/// Per-session timing and policy from loaded settings.
pub fn session_config(settings: &GatewaySettings) -> SessionConfig {
    SessionConfig {
        pair_timeout: settings.broker.pair_timeout(),
        fail_fast_without_instances: settings.broker.fail_fast_without_instances,
        heartbeat_interval: settings.server.heartbeat_interval(),
        heartbeat_timeout: settings.server.heartbeat_timeout(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_locally_on_ephemeral_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
        assert_eq!(cfg.subprotocol, "guacamole");
    }

    #[test]
    fn from_settings_copies_listener_and_fabric_values() {
        let mut settings = GatewaySettings::default();
        settings.server.port = 9443;
        settings.server.max_connections = 7;
        settings.broker.channel_capacity = 12;
        settings.broker.subprotocol = "rdp-relay".into();
        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.bind_addr(), "0.0.0.0:9443");
        assert_eq!(cfg.max_connections, 7);
        assert_eq!(cfg.channel_capacity, 12);
        assert_eq!(cfg.subprotocol, "rdp-relay");
    }

    #[test]
    fn zero_pair_timeout_disables_deadline() {
        let mut settings = GatewaySettings::default();
        settings.broker.pair_timeout_secs = 0;
        settings.broker.fail_fast_without_instances = false;
        let cfg = session_config(&settings);
        assert_eq!(cfg.pair_timeout, None);
        assert!(!cfg.fail_fast_without_instances);
        assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(90));
    }

    #[test]
    fn sweep_interval_is_never_zero() {
        let cfg = ServerConfig {
            token_sweep_interval_secs: 0,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.token_sweep_interval(), Duration::from_secs(1));
    }
}
