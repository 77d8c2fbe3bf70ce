//! Connection tokens: issuance, resolution and expiry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use rac_core::expiry::parse_expiry;
use rac_core::{
    ConnectionToken, DisplayHints, Endpoint, EndpointId, Provider, ProviderId, SessionKey,
    SessionParams,
};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::cache::{ENDPOINT_CACHE_PREFIX, EndpointListCache, user_endpoint_cache_key};
use crate::catalog::Catalog;
use crate::errors::BrokerError;

/// Length of issued token strings.
pub const TOKEN_LENGTH: usize = 60;

/// Turns a token presented by a client into session parameters.
#[async_trait]
pub trait TokenResolver: Send + Sync {
    /// Resolve `token`, folding in the client's display hints.
    ///
    /// Fails with [`BrokerError::TokenInvalid`] when the token is unknown or
    /// expired.
    async fn resolve(&self, token: &str, hints: DisplayHints)
    -> Result<SessionParams, BrokerError>;
}

/// In-memory store of providers, endpoints and their connection tokens.
#[derive(Default)]
pub struct TokenStore {
    providers: RwLock<HashMap<ProviderId, Provider>>,
    endpoints: RwLock<HashMap<EndpointId, Endpoint>>,
    tokens: RwLock<HashMap<String, ConnectionToken>>,
    cache: Arc<EndpointListCache>,
}

impl TokenStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded from a validated catalog.
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let store = Self::new();
        {
            let mut providers = store.providers.write();
            for p in &catalog.providers {
                let _ = providers.insert(p.id.clone(), p.clone());
            }
            let mut endpoints = store.endpoints.write();
            for e in &catalog.endpoints {
                let _ = endpoints.insert(e.id.clone(), e.clone());
            }
            let mut tokens = store.tokens.write();
            for t in &catalog.tokens {
                let _ = tokens.insert(t.token.clone(), t.clone());
            }
        }
        store
    }

    /// The endpoint listing cache this store invalidates.
    pub fn cache(&self) -> &Arc<EndpointListCache> {
        &self.cache
    }

    /// Add or replace a provider.
    pub fn add_provider(&self, provider: Provider) {
        let _ = self.providers.write().insert(provider.id.clone(), provider);
    }

    /// Add or replace an endpoint. Creating a new endpoint invalidates every
    /// cached listing.
    pub fn add_endpoint(&self, endpoint: Endpoint) -> Result<(), BrokerError> {
        if !self.providers.read().contains_key(&endpoint.provider) {
            return Err(BrokerError::UnknownProvider(endpoint.provider));
        }
        let id = endpoint.id.clone();
        let created = self.endpoints.write().insert(id.clone(), endpoint).is_none();
        if created {
            let removed = self.cache.invalidate_prefix(ENDPOINT_CACHE_PREFIX);
            debug!(endpoint = %id, removed, "endpoint created");
        }
        Ok(())
    }

    /// Endpoints visible to `user`, sorted by name. Cached per user.
    pub fn endpoints_for(&self, user: &str) -> Arc<Vec<Endpoint>> {
        self.cache.get_or_insert_with(&user_endpoint_cache_key(user), || {
            let mut list: Vec<Endpoint> = self.endpoints.read().values().cloned().collect();
            list.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
            list
        })
    }

    /// Store an existing token.
    pub fn insert_token(&self, token: ConnectionToken) {
        let _ = self.tokens.write().insert(token.token.clone(), token);
    }

    /// Issue a fresh token for `endpoint` under `session`.
    pub fn issue(
        &self,
        endpoint: &EndpointId,
        session: SessionKey,
        settings: Map<String, Value>,
    ) -> Result<ConnectionToken, BrokerError> {
        self.issue_at(endpoint, session, settings, Utc::now())
    }

    /// [`issue`](Self::issue) with an explicit clock.
    ///
    /// The lifetime comes from the provider's `connection_expiry`. A zero
    /// lifetime issues a non-expiring token.
    pub fn issue_at(
        &self,
        endpoint: &EndpointId,
        session: SessionKey,
        settings: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<ConnectionToken, BrokerError> {
        let provider_id = self
            .endpoints
            .read()
            .get(endpoint)
            .map(|e| e.provider.clone())
            .ok_or_else(|| BrokerError::UnknownEndpoint(endpoint.clone()))?;
        let lifetime = {
            let providers = self.providers.read();
            let provider = providers
                .get(&provider_id)
                .ok_or_else(|| BrokerError::UnknownProvider(provider_id.clone()))?;
            parse_expiry(&provider.connection_expiry)?
        };

        let token = ConnectionToken {
            token: generate_token(),
            expires: now.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC),
            expiring: lifetime != TimeDelta::zero(),
            settings,
            provider: provider_id,
            endpoint: endpoint.clone(),
            session,
        };
        info!(
            endpoint = %token.endpoint,
            session = %token.session,
            expiring = token.expiring,
            "connection token issued"
        );
        self.insert_token(token.clone());
        Ok(token)
    }

    /// [`TokenResolver::resolve`] with an explicit clock.
    pub fn resolve_at(
        &self,
        token: &str,
        hints: DisplayHints,
        now: DateTime<Utc>,
    ) -> Result<SessionParams, BrokerError> {
        let token = self
            .tokens
            .read()
            .get(token)
            .filter(|t| !t.is_expired(now))
            .cloned()
            .ok_or(BrokerError::TokenInvalid)?;

        let provider = self
            .providers
            .read()
            .get(&token.provider)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownProvider(token.provider.clone()))?;
        let endpoint = self
            .endpoints
            .read()
            .get(&token.endpoint)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownEndpoint(token.endpoint.clone()))?;

        Ok(SessionParams {
            settings: token.connection_settings(&provider, &endpoint),
            provider: provider.id,
            endpoint: endpoint.id,
            endpoint_name: endpoint.name,
            protocol: endpoint.protocol,
            session: token.session,
            hints,
        })
    }

    /// Delete tokens expired as of now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    /// [`purge_expired`](Self::purge_expired) with an explicit clock.
    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|_, t| !t.is_expired(now));
        before - tokens.len()
    }

    /// Delete every token issued under `session`.
    pub fn revoke_session(&self, session: &SessionKey) -> usize {
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|_, t| &t.session != session);
        before - tokens.len()
    }

    /// Number of stored tokens.
    pub fn token_count(&self) -> usize {
        self.tokens.read().len()
    }
}

#[async_trait]
impl TokenResolver for TokenStore {
    async fn resolve(
        &self,
        token: &str,
        hints: DisplayHints,
    ) -> Result<SessionParams, BrokerError> {
        self.resolve_at(token, hints, Utc::now())
    }
}

fn generate_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}
