//! The seam between the broker and a concrete client or worker connection.

use async_trait::async_trait;
use rac_core::Frame;

use crate::errors::BrokerError;

/// WebSocket close codes the broker uses.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Server going away or peer unresponsive.
    pub const GOING_AWAY: u16 = 1001;
    /// Request refused by policy.
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Unexpected server-side failure.
    pub const INTERNAL_ERROR: u16 = 1011;
    /// No worker picked the session up; retry later.
    pub const TRY_AGAIN_LATER: u16 = 1013;
}

/// Something a transport produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A data frame from the peer.
    Frame(Frame),
    /// A heartbeat reply.
    Pong,
}

/// A bidirectional frame transport.
///
/// `recv` must be cancel-safe: the relay loops race it against other events
/// and drop the pending future when another branch wins.
#[async_trait]
pub trait FrameTransport: Send {
    /// Next event, or `None` once the peer has gone.
    async fn recv(&mut self) -> Option<TransportEvent>;

    /// Write one frame to the peer.
    async fn send(&mut self, frame: Frame) -> Result<(), BrokerError>;

    /// Send a heartbeat ping.
    async fn ping(&mut self) -> Result<(), BrokerError> {
        Ok(())
    }

    /// Close with a WebSocket status code and reason. Best-effort.
    async fn close(&mut self, code: u16, reason: &str);
}
