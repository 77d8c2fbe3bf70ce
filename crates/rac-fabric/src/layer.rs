//! The in-process channel layer.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use rac_core::{ChannelName, FabricMessage};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace};

use crate::errors::FabricError;
use crate::group::{GroupName, validate_name};

/// Process-wide pub/sub bus of bounded channels and broadcast groups.
///
/// Cheap to clone; clones share the same channels and groups.
#[derive(Clone)]
pub struct ChannelLayer {
    inner: Arc<LayerInner>,
}

struct LayerInner {
    capacity: usize,
    channels: DashMap<ChannelName, mpsc::Sender<FabricMessage>>,
    groups: Mutex<Groups>,
}

/// Membership in both directions, kept consistent under one lock.
#[derive(Default)]
struct Groups {
    members: HashMap<GroupName, HashSet<ChannelName>>,
    joined: HashMap<ChannelName, HashSet<GroupName>>,
}

impl Groups {
    fn remove(&mut self, group: &GroupName, channel: &ChannelName) {
        if let Some(set) = self.members.get_mut(group) {
            let _ = set.remove(channel);
            if set.is_empty() {
                let _ = self.members.remove(group);
            }
        }
        if let Some(set) = self.joined.get_mut(channel) {
            let _ = set.remove(group);
            if set.is_empty() {
                let _ = self.joined.remove(channel);
            }
        }
    }
}

impl LayerInner {
    fn release(&self, name: &ChannelName) {
        let _ = self.channels.remove(name);
        let mut groups = self.groups.lock();
        let joined = groups.joined.remove(name).unwrap_or_default();
        for group in &joined {
            if let Some(set) = groups.members.get_mut(group) {
                let _ = set.remove(name);
                if set.is_empty() {
                    let _ = groups.members.remove(group);
                }
            }
        }
        trace!(channel = %name, groups = joined.len(), "channel released");
    }
}

impl ChannelLayer {
    /// Create a layer whose channels each queue at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(LayerInner {
                capacity: capacity.max(1),
                channels: DashMap::new(),
                groups: Mutex::new(Groups::default()),
            }),
        }
    }

    /// Per-channel queue capacity.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Allocate a fresh channel named `"{prefix}.{unique}"`.
    pub fn new_channel(&self, prefix: &str) -> Result<Subscription, FabricError> {
        validate_name(prefix)?;
        let name = ChannelName::generate(prefix);
        validate_name(&name)?;
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let _ = self.inner.channels.insert(name.clone(), tx);
        trace!(channel = %name, "channel allocated");
        Ok(Subscription {
            name,
            rx,
            layer: Arc::downgrade(&self.inner),
        })
    }

    /// Enqueue `message` on channel `to` without waiting.
    ///
    /// Messages from one sender to one channel are delivered in send order.
    pub fn send(&self, to: &ChannelName, message: FabricMessage) -> Result<(), FabricError> {
        let tx = self
            .inner
            .channels
            .get(to)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FabricError::NoSuchChannel(to.clone()))?;
        tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => FabricError::ChannelFull(to.clone()),
            TrySendError::Closed(_) => FabricError::NoSuchChannel(to.clone()),
        })
    }

    /// Subscribe `channel` to `group`. Adding twice is a no-op.
    pub fn group_add(&self, group: &GroupName, channel: &ChannelName) -> Result<(), FabricError> {
        validate_name(group.as_str())?;
        let mut groups = self.inner.groups.lock();
        // Checked under the group lock so a concurrent release cannot leave
        // a stale membership behind.
        if !self.inner.channels.contains_key(channel) {
            return Err(FabricError::NoSuchChannel(channel.clone()));
        }
        let _ = groups
            .members
            .entry(group.clone())
            .or_default()
            .insert(channel.clone());
        let _ = groups
            .joined
            .entry(channel.clone())
            .or_default()
            .insert(group.clone());
        Ok(())
    }

    /// Unsubscribe `channel` from `group`. Unknown pairs are ignored.
    pub fn group_discard(&self, group: &GroupName, channel: &ChannelName) {
        self.inner.groups.lock().remove(group, channel);
    }

    /// Deliver `message` to every current member of `group`.
    ///
    /// Returns how many members accepted it. Members with a full queue miss
    /// the message; the others are unaffected.
    pub fn group_send(&self, group: &GroupName, message: &FabricMessage) -> usize {
        let members: Vec<ChannelName> = self
            .inner
            .groups
            .lock()
            .members
            .get(group)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for member in &members {
            match self.send(member, message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(group = %group, channel = %member, error = %e, "group member skipped"),
            }
        }
        trace!(group = %group, kind = message.kind(), delivered, members = members.len(), "group send");
        delivered
    }

    /// Number of channels currently in `group`.
    pub fn group_len(&self, group: &GroupName) -> usize {
        self.inner
            .groups
            .lock()
            .members
            .get(group)
            .map_or(0, HashSet::len)
    }

    /// Groups `channel` currently belongs to.
    pub fn groups_of(&self, channel: &ChannelName) -> Vec<GroupName> {
        self.inner
            .groups
            .lock()
            .joined
            .get(channel)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether a subscriber currently owns `channel`.
    pub fn has_channel(&self, channel: &ChannelName) -> bool {
        self.inner.channels.contains_key(channel)
    }

    /// Number of live channels.
    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }
}

impl std::fmt::Debug for ChannelLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelLayer")
            .field("capacity", &self.inner.capacity)
            .field("channels", &self.inner.channels.len())
            .finish_non_exhaustive()
    }
}

impl Default for ChannelLayer {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Ownership of one channel. Dropping it releases the channel and all of its
/// group memberships.
pub struct Subscription {
    name: ChannelName,
    rx: mpsc::Receiver<FabricMessage>,
    layer: Weak<LayerInner>,
}

impl Subscription {
    /// This channel's name.
    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    /// Wait for the next message. Cancel-safe.
    ///
    /// Returns `None` only once the layer itself is gone.
    pub async fn recv(&mut self) -> Option<FabricMessage> {
        self.rx.recv().await
    }

    /// Take the next message if one is queued.
    pub fn try_recv(&mut self) -> Option<FabricMessage> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.layer.upgrade() {
            inner.release(&self.name);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("name", &self.name).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rac_core::Frame;

    fn text(s: &str) -> FabricMessage {
        FabricMessage::data(Frame::Text(s.into()))
    }

    #[tokio::test]
    async fn point_to_point_preserves_order() {
        let layer = ChannelLayer::new(8);
        let mut sub = layer.new_channel("rac_client").unwrap();
        for i in 0..5 {
            layer.send(sub.name(), text(&i.to_string())).unwrap();
        }
        for i in 0..5 {
            assert_eq!(sub.recv().await, Some(text(&i.to_string())));
        }
    }

    #[test]
    fn full_channel_rejects_without_blocking() {
        let layer = ChannelLayer::new(2);
        let mut sub = layer.new_channel("c").unwrap();
        layer.send(sub.name(), text("1")).unwrap();
        layer.send(sub.name(), text("2")).unwrap();
        let err = layer.send(sub.name(), text("3")).unwrap_err();
        assert_eq!(err, FabricError::ChannelFull(sub.name().clone()));

        // Draining frees capacity again.
        assert_eq!(sub.try_recv(), Some(text("1")));
        layer.send(sub.name(), text("4")).unwrap();
    }

    #[test]
    fn send_to_unknown_channel() {
        let layer = ChannelLayer::new(2);
        let err = layer.send(&"nobody.1".into(), text("x")).unwrap_err();
        assert!(matches!(err, FabricError::NoSuchChannel(_)));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let layer = ChannelLayer::new(0);
        assert_eq!(layer.capacity(), 1);
        let sub = layer.new_channel("c").unwrap();
        layer.send(sub.name(), text("x")).unwrap();
    }

    #[test]
    fn invalid_prefix_rejected() {
        let layer = ChannelLayer::default();
        assert!(matches!(
            layer.new_channel("bad prefix"),
            Err(FabricError::InvalidName { .. })
        ));
    }

    #[test]
    fn group_send_reaches_every_member_only() {
        let layer = ChannelLayer::new(4);
        let group = GroupName::new("g");
        let mut a = layer.new_channel("a").unwrap();
        let mut b = layer.new_channel("b").unwrap();
        let mut outsider = layer.new_channel("o").unwrap();
        layer.group_add(&group, a.name()).unwrap();
        layer.group_add(&group, b.name()).unwrap();
        layer.group_add(&group, b.name()).unwrap();

        assert_eq!(layer.group_len(&group), 2);
        assert_eq!(layer.group_send(&group, &text("hi")), 2);
        assert_eq!(a.try_recv(), Some(text("hi")));
        assert_eq!(b.try_recv(), Some(text("hi")));
        assert_eq!(b.try_recv(), None);
        assert_eq!(outsider.try_recv(), None);
    }

    #[test]
    fn full_member_does_not_block_the_rest() {
        let layer = ChannelLayer::new(1);
        let group = GroupName::new("g");
        let full = layer.new_channel("full").unwrap();
        let mut ok = layer.new_channel("ok").unwrap();
        layer.send(full.name(), text("backlog")).unwrap();
        layer.group_add(&group, full.name()).unwrap();
        layer.group_add(&group, ok.name()).unwrap();

        assert_eq!(layer.group_send(&group, &text("x")), 1);
        assert_eq!(ok.try_recv(), Some(text("x")));
    }

    #[test]
    fn group_send_to_empty_group() {
        let layer = ChannelLayer::default();
        assert_eq!(layer.group_send(&GroupName::new("empty"), &text("x")), 0);
    }

    #[test]
    fn discard_leaves_group() {
        let layer = ChannelLayer::default();
        let group = GroupName::new("g");
        let mut a = layer.new_channel("a").unwrap();
        layer.group_add(&group, a.name()).unwrap();
        layer.group_discard(&group, a.name());
        assert_eq!(layer.group_send(&group, &text("x")), 0);
        assert_eq!(a.try_recv(), None);
        assert!(layer.groups_of(a.name()).is_empty());
    }

    #[test]
    fn drop_releases_channel_and_memberships() {
        let layer = ChannelLayer::default();
        let g1 = GroupName::new("g1");
        let g2 = GroupName::new("g2");
        let sub = layer.new_channel("a").unwrap();
        let name = sub.name().clone();
        layer.group_add(&g1, &name).unwrap();
        layer.group_add(&g2, &name).unwrap();
        assert_eq!(layer.groups_of(&name).len(), 2);

        drop(sub);

        assert!(!layer.has_channel(&name));
        assert_eq!(layer.channel_count(), 0);
        assert_eq!(layer.group_len(&g1), 0);
        assert_eq!(layer.group_len(&g2), 0);
        assert!(matches!(
            layer.send(&name, text("late")),
            Err(FabricError::NoSuchChannel(_))
        ));
    }

    #[test]
    fn group_add_requires_live_channel() {
        let layer = ChannelLayer::default();
        let err = layer
            .group_add(&GroupName::new("g"), &"ghost.1".into())
            .unwrap_err();
        assert!(matches!(err, FabricError::NoSuchChannel(_)));
    }

    #[test]
    fn subscription_outliving_layer_drops_cleanly() {
        let layer = ChannelLayer::default();
        let sub = layer.new_channel("a").unwrap();
        drop(layer);
        drop(sub);
    }

    #[tokio::test]
    async fn recv_wakes_on_send_from_other_task() {
        let layer = ChannelLayer::default();
        let mut sub = layer.new_channel("a").unwrap();
        let name = sub.name().clone();
        let sender = layer.clone();
        let handle = tokio::spawn(async move {
            sender.send(&name, text("ping")).unwrap();
        });
        assert_eq!(sub.recv().await, Some(text("ping")));
        handle.await.unwrap();
    }
}
