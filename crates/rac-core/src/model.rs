//! Providers, endpoints, connection tokens, and worker instances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{EndpointId, InstanceUid, OutpostId, ProviderId, SessionKey};
use crate::merge::{deep_merge, stringify_values};
use crate::messages::DisplayHints;

/// Client name reported to remote hosts unless settings override it.
pub const DEFAULT_CLIENT_NAME: &str = "rac";

/// Remote protocol spoken by a worker to an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Remote Desktop Protocol.
    Rdp,
    /// Virtual Network Computing.
    Vnc,
    /// Secure Shell.
    Ssh,
}

impl Protocol {
    /// Wire name of the protocol.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rdp => "rdp",
            Self::Vnc => "vnc",
            Self::Ssh => "ssh",
        }
    }
}

/// How credentials for an endpoint are obtained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Credentials are part of the stored settings.
    Static,
    /// The user is prompted for credentials.
    #[default]
    Prompt,
}

fn default_connection_expiry() -> String {
    "hours=8".to_string()
}

fn default_true() -> bool {
    true
}

/// A RAC provider: owns endpoints and is served by outposts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    /// Provider identity.
    pub id: ProviderId,
    /// Display name.
    pub name: String,
    /// Settings applied to every endpoint of this provider.
    #[serde(default)]
    pub settings: Map<String, Value>,
    /// Default credential mode.
    #[serde(default)]
    pub auth_mode: AuthMode,
    /// Lifetime of connection tokens, e.g. `hours=8`. Zero means tokens
    /// never expire on their own.
    #[serde(default = "default_connection_expiry")]
    pub connection_expiry: String,
}

/// A remote host reachable through a provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Endpoint identity.
    pub id: EndpointId,
    /// Display name.
    pub name: String,
    /// Host address, optionally with `:port`.
    pub host: String,
    /// Protocol the worker speaks to this host.
    pub protocol: Protocol,
    /// Endpoint-specific settings, layered over the provider's.
    #[serde(default)]
    pub settings: Map<String, Value>,
    /// Credential mode.
    #[serde(default)]
    pub auth_mode: AuthMode,
    /// Owning provider.
    pub provider: ProviderId,
}

impl Endpoint {
    /// Split `host` into hostname and optional port.
    ///
    /// Handles bracketed IPv6 (`[::1]:3389`). A bare IPv6 address with more
    /// than one colon is treated as having no port.
    pub fn host_and_port(&self) -> (&str, Option<&str>) {
        let host = self.host.as_str();
        if let Some(rest) = host.strip_prefix('[') {
            if let Some((addr, port)) = rest.split_once("]:") {
                return (addr, Some(port));
            }
            return (rest.trim_end_matches(']'), None);
        }
        match host.split_once(':') {
            Some((name, port)) if !port.contains(':') => (name, Some(port)),
            _ => (host, None),
        }
    }
}

/// A short-lived credential allowing one client to open a session to one
/// endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionToken {
    /// Opaque token string presented by the client.
    pub token: String,
    /// Expiry instant.
    pub expires: DateTime<Utc>,
    /// Whether `expires` is enforced.
    #[serde(default = "default_true")]
    pub expiring: bool,
    /// Per-token settings, layered last.
    #[serde(default)]
    pub settings: Map<String, Value>,
    /// Provider the token was issued for.
    pub provider: ProviderId,
    /// Endpoint the token grants access to.
    pub endpoint: EndpointId,
    /// Authenticated session the token belongs to.
    pub session: SessionKey,
}

impl ConnectionToken {
    /// Whether the token is no longer usable at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiring && self.expires <= now
    }

    /// Build the flat connection settings handed to a worker.
    ///
    /// Layers, lowest first: hostname/port derived from the endpoint host and
    /// the default client name, provider settings, endpoint settings, token
    /// settings. The drive path is always per token. Every value is rendered
    /// as a string.
    pub fn connection_settings(&self, provider: &Provider, endpoint: &Endpoint) -> Map<String, Value> {
        let (hostname, port) = endpoint.host_and_port();
        let mut base = Map::new();
        let _ = base.insert("hostname".into(), Value::String(hostname.to_owned()));
        if let Some(port) = port {
            let _ = base.insert("port".into(), Value::String(port.to_owned()));
        }
        let _ = base.insert("client-name".into(), Value::String(DEFAULT_CLIENT_NAME.into()));

        let mut merged = Value::Object(base);
        for layer in [&provider.settings, &endpoint.settings, &self.settings] {
            merged = deep_merge(merged, Value::Object(layer.clone()));
        }

        let mut settings = match merged {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let _ = settings.insert(
            "drive-path".into(),
            Value::String(format!("/tmp/connection/{}", self.token)),
        );
        let _ = settings.insert("create-drive-path".into(), Value::String("true".into()));
        stringify_values(settings)
    }
}

/// One live worker instance as seen by the instance directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInstance {
    /// Instance identity within its outpost.
    pub uid: InstanceUid,
    /// Connections the instance is currently serving.
    pub active_connections: u64,
}

impl WorkerInstance {
    /// Convenience constructor.
    pub fn new(uid: impl Into<InstanceUid>, active_connections: u64) -> Self {
        Self {
            uid: uid.into(),
            active_connections,
        }
    }
}

/// Snapshot of the instances of one outpost.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutpostInstances {
    /// The outpost.
    pub outpost: OutpostId,
    /// Its live instances, in directory order.
    pub instances: Vec<WorkerInstance>,
}

/// Everything needed to start pairing for one client connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    /// Provider owning the endpoint.
    pub provider: ProviderId,
    /// Target endpoint.
    pub endpoint: EndpointId,
    /// Endpoint display name, for logging.
    pub endpoint_name: String,
    /// Protocol to speak to the endpoint.
    pub protocol: Protocol,
    /// Authenticated session the connection belongs to.
    pub session: SessionKey,
    /// Flat connection settings.
    pub settings: Map<String, Value>,
    /// Display and audio hints supplied by the client.
    pub hints: DisplayHints,
}
