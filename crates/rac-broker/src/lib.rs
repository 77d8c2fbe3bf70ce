//! # rac-broker
//!
//! The rendezvous-and-relay core.
//!
//! A client arrives with a connection token. [`tokens`] resolves it into
//! session parameters, [`selector`] picks the least-loaded instance of every
//! outpost serving the provider, and [`actor`] broadcasts a pair offer to
//! each, waits for the first `paired` claim naming its own channel, and
//! relays frames verbatim until either side goes away. [`worker`] holds the
//! broker's half of a worker's control and relay connections, and
//! [`teardown`] ends every connection of a session at once.

#![deny(unsafe_code)]

pub mod actor;
pub mod cache;
pub mod catalog;
pub mod context;
pub mod directory;
pub mod errors;
pub mod heartbeat;
pub mod metrics;
pub mod selector;
pub mod session;
pub mod teardown;
pub mod tokens;
pub mod transport;
pub mod worker;

#[cfg(test)]
mod testing;

pub use actor::{SessionOutcome, run_client_session};
pub use cache::EndpointListCache;
pub use catalog::Catalog;
pub use context::{BrokerContext, SessionConfig, SessionStats};
pub use directory::{InMemoryDirectory, InstanceDirectory};
pub use errors::BrokerError;
pub use teardown::{LOGOUT_REASON, SessionTeardown};
pub use tokens::{TokenResolver, TokenStore};
pub use transport::{FrameTransport, TransportEvent, close_code};
pub use worker::{WorkerOutcome, run_outpost_control, run_worker_relay};
