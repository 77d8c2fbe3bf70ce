//! Per-user endpoint listing cache.

use std::sync::Arc;

use dashmap::DashMap;
use rac_core::Endpoint;
use tracing::debug;

/// Prefix shared by every listing key.
pub const ENDPOINT_CACHE_PREFIX: &str = "rac/endpoints/";

/// Cache key of `user`'s endpoint listing.
pub fn user_endpoint_cache_key(user: &str) -> String {
    format!("{ENDPOINT_CACHE_PREFIX}{user}")
}

/// Derived endpoint listings keyed by [`user_endpoint_cache_key`].
#[derive(Default)]
pub struct EndpointListCache {
    entries: DashMap<String, Arc<Vec<Endpoint>>>,
}

impl EndpointListCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached listing under `key`.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<Endpoint>>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Return the listing under `key`, computing and storing it on a miss.
    pub fn get_or_insert_with(
        &self,
        key: &str,
        build: impl FnOnce() -> Vec<Endpoint>,
    ) -> Arc<Vec<Endpoint>> {
        Arc::clone(
            self.entries
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(build()))
                .value(),
        )
    }

    /// Drop every entry whose key starts with `prefix`. Returns how many went.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before.saturating_sub(self.entries.len());
        debug!(prefix, removed, "endpoint cache invalidated");
        removed
    }

    /// Number of cached listings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
