//! Shared state handed to every session task.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use metrics::gauge;
use rac_fabric::ChannelLayer;
use tokio_util::sync::CancellationToken;

use crate::directory::InstanceDirectory;
use crate::metrics::{RAC_SESSIONS_ACTIVE, RAC_SESSIONS_PAIRED};
use crate::tokens::TokenResolver;

/// Timing and policy knobs for session tasks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long a client may wait for a claim. `None` waits forever.
    pub pair_timeout: Option<Duration>,
    /// Close immediately when no instance can receive an offer.
    pub fail_fast_without_instances: bool,
    /// Ping period.
    pub heartbeat_interval: Duration,
    /// Silence tolerated before a peer is dropped.
    pub heartbeat_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pair_timeout: Some(Duration::from_secs(30)),
            fail_fast_without_instances: true,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
        }
    }
}

/// Live session counters, mirrored into gauges.
#[derive(Debug, Default)]
pub struct SessionStats {
    active: AtomicUsize,
    paired: AtomicUsize,
}

impl SessionStats {
    /// Client sessions currently running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Client sessions currently paired.
    pub fn paired(&self) -> usize {
        self.paired.load(Ordering::Relaxed)
    }

    pub(crate) fn track_active(self: &Arc<Self>) -> StatGuard {
        StatGuard::new(Arc::clone(self), Stat::Active)
    }

    pub(crate) fn track_paired(self: &Arc<Self>) -> StatGuard {
        StatGuard::new(Arc::clone(self), Stat::Paired)
    }

    fn counter(&self, stat: Stat) -> &AtomicUsize {
        match stat {
            Stat::Active => &self.active,
            Stat::Paired => &self.paired,
        }
    }
}

#[derive(Clone, Copy)]
enum Stat {
    Active,
    Paired,
}

/// Holds one unit of a [`SessionStats`] counter until dropped.
pub(crate) struct StatGuard {
    stats: Arc<SessionStats>,
    stat: Stat,
}

impl StatGuard {
    fn new(stats: Arc<SessionStats>, stat: Stat) -> Self {
        let _ = stats.counter(stat).fetch_add(1, Ordering::Relaxed);
        gauge!(stat.metric()).increment(1.0);
        Self { stats, stat }
    }
}

impl Drop for StatGuard {
    fn drop(&mut self) {
        let _ = self.stats.counter(self.stat).fetch_sub(1, Ordering::Relaxed);
        gauge!(self.stat.metric()).decrement(1.0);
    }
}

impl Stat {
    fn metric(self) -> &'static str {
        match self {
            Self::Active => RAC_SESSIONS_ACTIVE,
            Self::Paired => RAC_SESSIONS_PAIRED,
        }
    }
}

/// Everything a session task needs. Cheap to clone.
#[derive(Clone)]
pub struct BrokerContext {
    /// The messaging fabric.
    pub layer: ChannelLayer,
    /// Token resolution.
    pub tokens: Arc<dyn TokenResolver>,
    /// Live worker instances.
    pub directory: Arc<dyn InstanceDirectory>,
    /// Timing and policy.
    pub config: SessionConfig,
    /// Cancelled when the process is shutting down.
    pub shutdown: CancellationToken,
    /// Live session counters.
    pub stats: Arc<SessionStats>,
}

impl BrokerContext {
    /// Bundle the broker's collaborators.
    pub fn new(
        layer: ChannelLayer,
        tokens: Arc<dyn TokenResolver>,
        directory: Arc<dyn InstanceDirectory>,
        config: SessionConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            layer,
            tokens,
            directory,
            config,
            shutdown,
            stats: Arc::new(SessionStats::default()),
        }
    }
}
