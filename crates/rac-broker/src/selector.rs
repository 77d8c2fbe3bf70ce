//! Instance selection: one least-loaded instance per outpost.

use rac_core::{InstanceUid, OutpostId, OutpostInstances, ProviderId};
use rac_fabric::GroupName;

use crate::directory::InstanceDirectory;
use crate::errors::BrokerError;

/// An instance chosen to receive a pairing offer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OfferTarget {
    /// Outpost the instance belongs to.
    pub outpost: OutpostId,
    /// The chosen instance.
    pub instance: InstanceUid,
    /// Its load at selection time.
    pub active_connections: u64,
}

impl OfferTarget {
    /// Fabric group the offer is broadcast to.
    pub fn group(&self) -> GroupName {
        GroupName::outpost_instance(&self.outpost, &self.instance)
    }
}

/// Pick the least-loaded instance of every outpost in `snapshot`.
///
/// Ties go to the instance listed first. Outposts with no instances are
/// skipped. Load across outposts is not compared: each outpost gets its own
/// offer and the first claim wins.
pub fn select_offer_targets(snapshot: &[OutpostInstances]) -> Vec<OfferTarget> {
    snapshot
        .iter()
        .filter_map(|outpost| {
            // `min_by_key` keeps the first of equal minima.
            let best = outpost.instances.iter().min_by_key(|i| i.active_connections)?;
            Some(OfferTarget {
                outpost: outpost.outpost.clone(),
                instance: best.uid.clone(),
                active_connections: best.active_connections,
            })
        })
        .collect()
}

/// Query `directory` for `provider` and select offer targets.
///
/// Fails with [`BrokerError::NoCandidateInstance`] when no outpost serving
/// the provider has a live instance.
pub async fn select_candidates(
    directory: &dyn InstanceDirectory,
    provider: &ProviderId,
) -> Result<Vec<OfferTarget>, BrokerError> {
    let snapshot = directory.instances_for(provider).await;
    let targets = select_offer_targets(&snapshot);
    if targets.is_empty() {
        return Err(BrokerError::NoCandidateInstance(provider.clone()));
    }
    Ok(targets)
}
