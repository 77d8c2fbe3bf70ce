//! # rac-core
//!
//! Types shared by every crate of the RAC broker.
//!
//! - [`ids`]: branded string ids (provider, endpoint, outpost, session, channel)
//! - [`model`]: providers, endpoints, connection tokens, worker instances
//! - [`messages`]: frames and the message shapes carried by the fabric
//! - [`expiry`]: `hours=8;minutes=30` style duration strings
//! - [`merge`]: JSON deep merge and connection-settings flattening

#![deny(unsafe_code)]

pub mod errors;
pub mod expiry;
pub mod ids;
pub mod merge;
pub mod messages;
pub mod model;

pub use errors::CoreError;
pub use ids::{ChannelName, EndpointId, InstanceUid, OutpostId, ProviderId, SessionKey};
pub use messages::{DisplayHints, FabricMessage, Frame, PairOffer};
pub use model::{
    AuthMode, ConnectionToken, Endpoint, OutpostInstances, Protocol, Provider, SessionParams,
    WorkerInstance,
};
