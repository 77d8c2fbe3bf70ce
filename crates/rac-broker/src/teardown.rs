//! Ending every client connection of an authenticated session.

use metrics::counter;
use rac_core::{FabricMessage, SessionKey};
use rac_fabric::{ChannelLayer, GroupName};
use tracing::info;

use crate::metrics::RAC_TEARDOWNS_TOTAL;

/// Reason carried by the disconnect a logout sends.
pub const LOGOUT_REASON: &str = "logout";

/// Broadcasts disconnects to a session's client group.
#[derive(Clone, Debug)]
pub struct SessionTeardown {
    layer: ChannelLayer,
}

impl SessionTeardown {
    /// Tear down sessions over `layer`.
    pub fn new(layer: ChannelLayer) -> Self {
        Self { layer }
    }

    /// Disconnect every client connection opened under `session`.
    ///
    /// Returns how many connections were told. Clients of other sessions
    /// are untouched; each notified client relays the disconnect on to its
    /// worker.
    pub fn end_session(&self, session: &SessionKey, reason: &str) -> usize {
        let group = GroupName::rac_session(session);
        let notified = self
            .layer
            .group_send(&group, &FabricMessage::disconnect(Some(reason)));
        counter!(RAC_TEARDOWNS_TOTAL, "reason" => reason.to_owned()).increment(1);
        info!(%session, reason, notified, "session torn down");
        notified
    }
}
