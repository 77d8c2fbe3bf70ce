//! JSON catalog of providers, endpoints, outposts and pre-issued tokens.
//!
//! ```json
//! {
//!   "providers": [{ "id": "p", "name": "Lab", "connectionExpiry": "hours=8" }],
//!   "endpoints": [{ "id": "e", "name": "win", "host": "10.0.0.5:3389",
//!                   "protocol": "rdp", "provider": "p" }],
//!   "outposts":  [{ "id": "op", "providers": ["p"] }],
//!   "tokens":    []
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use rac_core::expiry::parse_expiry;
use rac_core::{ConnectionToken, Endpoint, OutpostId, Provider, ProviderId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::BrokerError;

/// Which providers an outpost serves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutpostAssignment {
    /// Outpost identity.
    pub id: OutpostId,
    /// Providers whose sessions this outpost's instances may claim.
    #[serde(default)]
    pub providers: Vec<ProviderId>,
}

/// Static configuration loaded at startup.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Catalog {
    /// Providers.
    pub providers: Vec<Provider>,
    /// Endpoints, each owned by one provider.
    pub endpoints: Vec<Endpoint>,
    /// Outpost to provider assignments.
    pub outposts: Vec<OutpostAssignment>,
    /// Tokens issued ahead of time.
    pub tokens: Vec<ConnectionToken>,
}

impl Catalog {
    /// Read and validate a catalog file.
    pub fn load(path: &Path) -> Result<Self, BrokerError> {
        debug!(?path, "loading catalog");
        let content = std::fs::read_to_string(path)
            .map_err(|e| BrokerError::Catalog(format!("{}: {e}", path.display())))?;
        Self::from_json(&content)
    }

    /// Parse and validate catalog JSON.
    pub fn from_json(json: &str) -> Result<Self, BrokerError> {
        let catalog: Self =
            serde_json::from_str(json).map_err(|e| BrokerError::Catalog(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Check cross references and expiry expressions.
    pub fn validate(&self) -> Result<(), BrokerError> {
        let providers: HashSet<&ProviderId> = self.providers.iter().map(|p| &p.id).collect();
        if providers.len() != self.providers.len() {
            return Err(BrokerError::Catalog("duplicate provider id".into()));
        }
        for provider in &self.providers {
            let _ = parse_expiry(&provider.connection_expiry)?;
        }
        for endpoint in &self.endpoints {
            if !providers.contains(&endpoint.provider) {
                return Err(BrokerError::UnknownProvider(endpoint.provider.clone()));
            }
        }
        for outpost in &self.outposts {
            if let Some(p) = outpost.providers.iter().find(|p| !providers.contains(p)) {
                return Err(BrokerError::UnknownProvider(p.clone()));
            }
        }
        for token in &self.tokens {
            let endpoint = self
                .endpoints
                .iter()
                .find(|e| e.id == token.endpoint)
                .ok_or_else(|| BrokerError::UnknownEndpoint(token.endpoint.clone()))?;
            if endpoint.provider != token.provider {
                return Err(BrokerError::Catalog(format!(
                    "token for endpoint {} names provider {}, endpoint belongs to {}",
                    endpoint.id, token.provider, endpoint.provider
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "providers": [{"id": "p", "name": "Lab", "connectionExpiry": "hours=1;minutes=30"}],
        "endpoints": [{"id": "e", "name": "win", "host": "10.0.0.5:3389", "protocol": "rdp", "provider": "p"}],
        "outposts": [{"id": "op", "providers": ["p"]}],
        "tokens": [{
            "token": "tok-A", "expires": "2030-01-01T00:00:00Z",
            "provider": "p", "endpoint": "e", "session": "s1"
        }]
    }"#;

    #[test]
    fn parses_sample() {
        let catalog = Catalog::from_json(SAMPLE).unwrap();
        assert_eq!(catalog.providers.len(), 1);
        assert_eq!(catalog.endpoints[0].protocol, rac_core::Protocol::Rdp);
        assert_eq!(catalog.outposts[0].providers, vec![ProviderId::from("p")]);
        assert!(catalog.tokens[0].expiring);
    }

    #[test]
    fn empty_object_is_empty_catalog() {
        assert_eq!(Catalog::from_json("{}").unwrap(), Catalog::default());
    }

    #[test]
    fn endpoint_with_unknown_provider() {
        let json = r#"{"endpoints": [{"id": "e", "name": "n", "host": "h", "protocol": "ssh", "provider": "ghost"}]}"#;
        assert!(matches!(
            Catalog::from_json(json),
            Err(BrokerError::UnknownProvider(p)) if p.as_str() == "ghost"
        ));
    }

    #[test]
    fn token_with_unknown_endpoint() {
        let json = r#"{
            "providers": [{"id": "p", "name": "Lab"}],
            "tokens": [{"token": "t", "expires": "2030-01-01T00:00:00Z", "provider": "p", "endpoint": "nope", "session": "s"}]
        }"#;
        assert!(matches!(
            Catalog::from_json(json),
            Err(BrokerError::UnknownEndpoint(_))
        ));
    }

    #[test]
    fn bad_expiry_rejected() {
        let json = r#"{"providers": [{"id": "p", "name": "Lab", "connectionExpiry": "fortnights=1"}]}"#;
        assert!(matches!(
            Catalog::from_json(json),
            Err(BrokerError::InvalidExpiry(_))
        ));
    }

    #[test]
    fn malformed_json() {
        assert!(matches!(
            Catalog::from_json("{"),
            Err(BrokerError::Catalog(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, SAMPLE).unwrap();
        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(catalog.tokens[0].token, "tok-A");
    }

    #[test]
    fn load_missing_file() {
        let err = Catalog::load(Path::new("/nonexistent/catalog.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/catalog.json"));
    }
}
