//! Fabric error types.

use rac_core::ChannelName;

/// Errors returned by [`ChannelLayer`](crate::ChannelLayer) operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FabricError {
    /// The destination's inbound queue is at capacity.
    #[error("channel {0} is full")]
    ChannelFull(ChannelName),

    /// No subscriber currently owns the destination name.
    #[error("no such channel: {0}")]
    NoSuchChannel(ChannelName),

    /// A channel or group name failed validation.
    #[error("invalid name {name:?}: {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl FabricError {
    /// Whether the failure is transient backpressure rather than a missing peer.
    pub fn is_full(&self) -> bool {
        matches!(self, Self::ChannelFull(_))
    }
}
