//! Instance directory: which worker instances are live, and how loaded.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use rac_core::{InstanceUid, OutpostId, OutpostInstances, ProviderId, WorkerInstance};
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::errors::BrokerError;

/// Live worker instances, grouped by outpost.
#[async_trait]
pub trait InstanceDirectory: Send + Sync {
    /// Instances of every outpost serving `provider`. Outposts without live
    /// instances may be omitted or returned empty.
    async fn instances_for(&self, provider: &ProviderId) -> Vec<OutpostInstances>;

    /// Whether `outpost` is configured at all.
    async fn knows_outpost(&self, outpost: &OutpostId) -> bool;

    /// Record a live instance of `outpost` with zero load.
    async fn register(&self, outpost: &OutpostId, uid: &InstanceUid) -> Result<(), BrokerError>;

    /// Update an instance's active-connection count. Returns whether the
    /// instance was known.
    async fn update_load(&self, outpost: &OutpostId, uid: &InstanceUid, active: u64) -> bool;

    /// Drop one registration of an instance. Returns whether it is now gone.
    async fn deregister(&self, outpost: &OutpostId, uid: &InstanceUid) -> bool;
}

#[derive(Default)]
struct OutpostEntry {
    providers: HashSet<ProviderId>,
    /// Registration order; selection ties resolve to the earliest.
    instances: Vec<Registered>,
}

struct Registered {
    instance: WorkerInstance,
    /// Control connections currently claiming this uid.
    connections: usize,
}

/// Directory kept in memory, fed by worker control connections.
#[derive(Default)]
pub struct InMemoryDirectory {
    outposts: RwLock<BTreeMap<OutpostId, OutpostEntry>>,
}

impl InMemoryDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory with the catalog's outpost assignments and no instances.
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let dir = Self::new();
        for outpost in &catalog.outposts {
            dir.assign(outpost.id.clone(), outpost.providers.iter().cloned());
        }
        dir
    }

    /// Declare that `outpost` serves `providers`, replacing earlier
    /// assignments. Live instances are kept.
    pub fn assign(&self, outpost: OutpostId, providers: impl IntoIterator<Item = ProviderId>) {
        let mut outposts = self.outposts.write();
        outposts.entry(outpost).or_default().providers = providers.into_iter().collect();
    }

    /// Whether `outpost` is known.
    pub fn has_outpost(&self, outpost: &OutpostId) -> bool {
        self.outposts.read().contains_key(outpost)
    }

    /// Total live instances across outposts.
    pub fn instance_count(&self) -> usize {
        self.outposts.read().values().map(|o| o.instances.len()).sum()
    }
}

#[async_trait]
impl InstanceDirectory for InMemoryDirectory {
    async fn instances_for(&self, provider: &ProviderId) -> Vec<OutpostInstances> {
        self.outposts
            .read()
            .iter()
            .filter(|(_, entry)| entry.providers.contains(provider))
            .map(|(id, entry)| OutpostInstances {
                outpost: id.clone(),
                instances: entry.instances.iter().map(|r| r.instance.clone()).collect(),
            })
            .collect()
    }

    async fn knows_outpost(&self, outpost: &OutpostId) -> bool {
        self.has_outpost(outpost)
    }

    async fn register(&self, outpost: &OutpostId, uid: &InstanceUid) -> Result<(), BrokerError> {
        let mut outposts = self.outposts.write();
        let entry = outposts
            .get_mut(outpost)
            .ok_or_else(|| BrokerError::UnknownOutpost(outpost.clone()))?;
        if let Some(existing) = entry.instances.iter_mut().find(|r| &r.instance.uid == uid) {
            existing.connections += 1;
            debug!(%outpost, instance = %uid, connections = existing.connections, "instance re-registered");
        } else {
            entry.instances.push(Registered {
                instance: WorkerInstance::new(uid.clone(), 0),
                connections: 1,
            });
            info!(%outpost, instance = %uid, "instance registered");
        }
        Ok(())
    }

    async fn update_load(&self, outpost: &OutpostId, uid: &InstanceUid, active: u64) -> bool {
        let mut outposts = self.outposts.write();
        let Some(found) = outposts
            .get_mut(outpost)
            .and_then(|e| e.instances.iter_mut().find(|r| &r.instance.uid == uid))
        else {
            return false;
        };
        found.instance.active_connections = active;
        true
    }

    async fn deregister(&self, outpost: &OutpostId, uid: &InstanceUid) -> bool {
        let mut outposts = self.outposts.write();
        let Some(entry) = outposts.get_mut(outpost) else {
            return false;
        };
        let Some(pos) = entry.instances.iter().position(|r| &r.instance.uid == uid) else {
            return false;
        };
        entry.instances[pos].connections -= 1;
        if entry.instances[pos].connections > 0 {
            return false;
        }
        let _ = entry.instances.remove(pos);
        info!(%outpost, instance = %uid, "instance deregistered");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir() -> InMemoryDirectory {
        let dir = InMemoryDirectory::new();
        dir.assign("op-a".into(), ["p".into()]);
        dir.assign("op-b".into(), ["p".into(), "q".into()]);
        dir.assign("op-c".into(), ["q".into()]);
        dir
    }

    #[tokio::test]
    async fn instances_grouped_by_serving_outposts() {
        let dir = dir();
        dir.register(&"op-a".into(), &"i1".into()).await.unwrap();
        dir.register(&"op-b".into(), &"i2".into()).await.unwrap();
        dir.register(&"op-c".into(), &"i3".into()).await.unwrap();

        let snapshot = dir.instances_for(&"p".into()).await;
        let outposts: Vec<&str> = snapshot.iter().map(|o| o.outpost.as_str()).collect();
        assert_eq!(outposts, ["op-a", "op-b"]);
        assert_eq!(snapshot[0].instances, vec![WorkerInstance::new("i1", 0)]);
    }

    #[tokio::test]
    async fn unknown_provider_sees_nothing() {
        let dir = dir();
        assert!(dir.instances_for(&"zzz".into()).await.is_empty());
    }

    #[tokio::test]
    async fn register_unknown_outpost_fails() {
        let dir = dir();
        assert!(matches!(
            dir.register(&"ghost".into(), &"i".into()).await,
            Err(BrokerError::UnknownOutpost(_))
        ));
    }

    #[tokio::test]
    async fn load_updates_are_visible() {
        let dir = dir();
        dir.register(&"op-a".into(), &"i1".into()).await.unwrap();
        assert!(dir.update_load(&"op-a".into(), &"i1".into(), 7).await);
        assert!(!dir.update_load(&"op-a".into(), &"nope".into(), 1).await);
        let snapshot = dir.instances_for(&"p".into()).await;
        assert_eq!(snapshot[0].instances[0].active_connections, 7);
    }

    #[tokio::test]
    async fn registration_is_reference_counted() {
        let dir = dir();
        let (op, uid) = (OutpostId::from("op-a"), InstanceUid::from("i1"));
        dir.register(&op, &uid).await.unwrap();
        dir.register(&op, &uid).await.unwrap();
        assert_eq!(dir.instance_count(), 1);

        assert!(!dir.deregister(&op, &uid).await);
        assert_eq!(dir.instance_count(), 1);
        assert!(dir.deregister(&op, &uid).await);
        assert_eq!(dir.instance_count(), 0);
        assert!(!dir.deregister(&op, &uid).await);
    }

    #[tokio::test]
    async fn registration_order_is_preserved() {
        let dir = dir();
        for uid in ["i3", "i1", "i2"] {
            dir.register(&"op-a".into(), &uid.into()).await.unwrap();
        }
        let snapshot = dir.instances_for(&"p".into()).await;
        let uids: Vec<&str> = snapshot[0].instances.iter().map(|i| i.uid.as_str()).collect();
        assert_eq!(uids, ["i3", "i1", "i2"]);
    }

    #[test]
    fn from_catalog_assigns_outposts() {
        let catalog = Catalog::from_json(
            r#"{"providers": [{"id": "p", "name": "Lab"}], "outposts": [{"id": "op", "providers": ["p"]}]}"#,
        )
        .unwrap();
        let dir = InMemoryDirectory::from_catalog(&catalog);
        assert!(dir.has_outpost(&"op".into()));
        assert!(!dir.has_outpost(&"other".into()));
    }
}
