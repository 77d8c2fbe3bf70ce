//! Client session state machine.
//!
//! Pure state transitions with no I/O; [`crate::actor`] drives it.
//!
//! ```text
//! Connecting ──offers sent──▶ AwaitingPair ──paired (own channel)──▶ Paired
//!      │                           │                                  │
//!      └───────────────────────────┴──── disconnect / client gone ────┴──▶ Closed
//! ```

use rac_core::{ChannelName, FabricMessage, Frame};

/// Lifecycle of one client connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PairingState {
    /// Resolving and broadcasting offers.
    Connecting,
    /// Offers are out; no destination yet.
    AwaitingPair,
    /// Bound to a worker channel.
    Paired {
        /// The worker channel frames are relayed to.
        worker: ChannelName,
    },
    /// Terminal.
    Closed,
}

/// What to do with a frame the client sent.
#[derive(Debug, PartialEq, Eq)]
pub enum ClientFrameAction {
    /// Relay the frame to the bound worker channel.
    Forward {
        /// Destination channel.
        to: ChannelName,
        /// The frame, unchanged.
        frame: Frame,
    },
    /// No destination yet (or anymore); drop the frame.
    Discard(Frame),
}

/// Why a fabric message was ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    /// A `paired` event named some other client channel.
    CrossTalk,
    /// A second claim arrived after the session was already bound.
    AlreadyPaired {
        /// Channel of the late claimant.
        worker: ChannelName,
    },
    /// Data arrived before pairing.
    NotPaired,
    /// A message kind clients never receive.
    Unexpected(&'static str),
    /// The session is already closed.
    Closed,
}

/// What to do with a message that arrived on the client's own channel.
#[derive(Debug, PartialEq, Eq)]
pub enum FabricAction {
    /// Write the frame to the client transport.
    Deliver(Frame),
    /// The session just became paired with `worker`.
    Bound(ChannelName),
    /// Nothing to do.
    Ignore(IgnoreReason),
    /// Close the client transport and notify the worker, if any.
    Close {
        /// Reason carried by the disconnect.
        reason: Option<String>,
        /// Worker channel to notify.
        notify: Option<ChannelName>,
    },
}

/// Pairing state owned by one client connection.
#[derive(Debug)]
pub struct ClientSession {
    channel: ChannelName,
    state: PairingState,
}

impl ClientSession {
    /// A session for the client listening on `channel`.
    pub fn new(channel: ChannelName) -> Self {
        Self {
            channel,
            state: PairingState::Connecting,
        }
    }

    /// The client's own channel.
    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    /// Current state.
    pub fn state(&self) -> &PairingState {
        &self.state
    }

    /// Bound worker channel, once paired.
    pub fn destination(&self) -> Option<&ChannelName> {
        match &self.state {
            PairingState::Paired { worker } => Some(worker),
            _ => None,
        }
    }

    /// Whether the session is waiting for a claim.
    pub fn is_awaiting_pair(&self) -> bool {
        self.state == PairingState::AwaitingPair
    }

    /// Whether the session has ended.
    pub fn is_closed(&self) -> bool {
        self.state == PairingState::Closed
    }

    /// Offers have been broadcast.
    pub fn offers_sent(&mut self) {
        if self.state == PairingState::Connecting {
            self.state = PairingState::AwaitingPair;
        }
    }

    /// A frame arrived from the client.
    pub fn on_client_frame(&self, frame: Frame) -> ClientFrameAction {
        match &self.state {
            PairingState::Paired { worker } => ClientFrameAction::Forward {
                to: worker.clone(),
                frame,
            },
            _ => ClientFrameAction::Discard(frame),
        }
    }

    /// A message arrived on the client's own channel.
    pub fn on_fabric(&mut self, message: FabricMessage) -> FabricAction {
        if self.is_closed() {
            return FabricAction::Ignore(IgnoreReason::Closed);
        }
        match message {
            FabricMessage::Paired {
                client_channel,
                worker_channel,
            } => {
                if client_channel != self.channel {
                    return FabricAction::Ignore(IgnoreReason::CrossTalk);
                }
                match self.state {
                    PairingState::AwaitingPair => {
                        self.state = PairingState::Paired {
                            worker: worker_channel.clone(),
                        };
                        FabricAction::Bound(worker_channel)
                    }
                    PairingState::Paired { .. } => {
                        FabricAction::Ignore(IgnoreReason::AlreadyPaired {
                            worker: worker_channel,
                        })
                    }
                    _ => FabricAction::Ignore(IgnoreReason::Unexpected("paired")),
                }
            }
            FabricMessage::Data { frame } => match self.state {
                PairingState::Paired { .. } => FabricAction::Deliver(frame),
                _ => FabricAction::Ignore(IgnoreReason::NotPaired),
            },
            FabricMessage::Disconnect { reason } => FabricAction::Close {
                reason,
                notify: self.close(),
            },
            FabricMessage::PairOffer(_) => FabricAction::Ignore(IgnoreReason::Unexpected("pair_offer")),
        }
    }

    /// The client transport went away.
    ///
    /// Returns the worker channel to notify, if one was bound.
    pub fn on_client_closed(&mut self) -> Option<ChannelName> {
        self.close()
    }

    /// Move to `Closed`, returning the bound worker channel if any.
    pub fn close(&mut self) -> Option<ChannelName> {
        match std::mem::replace(&mut self.state, PairingState::Closed) {
            PairingState::Paired { worker } => Some(worker),
            _ => None,
        }
    }
}
