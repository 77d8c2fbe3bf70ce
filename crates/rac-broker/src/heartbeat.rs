//! Ping/pong liveness tracking.

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// What to do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    /// Send a ping.
    Ping,
    /// Too many ticks passed without hearing from the peer.
    TimedOut,
}

/// Missed-pong counter for one connection.
///
/// Any traffic from the peer counts as a pong. After `timeout / interval`
/// consecutive silent ticks (at least one) the peer is considered dead.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    max_missed: u32,
    missed: u32,
    alive: bool,
}

impl Heartbeat {
    /// Tracker pinging every `interval`, giving up after `timeout`.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        let ratio = timeout.as_millis() / interval.as_millis();
        Self {
            interval,
            max_missed: u32::try_from(ratio).unwrap_or(u32::MAX).max(1),
            missed: 0,
            alive: true,
        }
    }

    /// A tick source whose first tick is one interval from now.
    pub fn ticker(&self) -> Interval {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// The peer showed signs of life.
    pub fn on_activity(&mut self) {
        self.alive = true;
    }

    /// Account for one tick.
    pub fn on_tick(&mut self) -> HeartbeatVerdict {
        if self.alive {
            self.missed = 0;
        } else {
            self.missed += 1;
            if self.missed >= self.max_missed {
                return HeartbeatVerdict::TimedOut;
            }
        }
        self.alive = false;
        HeartbeatVerdict::Ping
    }
}
