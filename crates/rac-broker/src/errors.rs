//! Broker error taxonomy.

use rac_core::{CoreError, EndpointId, OutpostId, ProviderId};
use rac_fabric::FabricError;
use thiserror::Error;

/// Errors raised while establishing or relaying a session.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The token does not exist or has expired.
    #[error("connection token is invalid or expired")]
    TokenInvalid,

    /// The provider has no live worker instance to offer the session to.
    #[error("no worker instance available for provider {0}")]
    NoCandidateInstance(ProviderId),

    /// A frame could not be handed to the bound destination.
    #[error("destination unreachable: {0}")]
    DestinationUnreachable(#[from] FabricError),

    /// The client or worker transport is gone.
    #[error("transport closed")]
    TransportClosed,

    /// An endpoint id is not in the catalog.
    #[error("unknown endpoint {0}")]
    UnknownEndpoint(EndpointId),

    /// A provider id is not in the catalog.
    #[error("unknown provider {0}")]
    UnknownProvider(ProviderId),

    /// An outpost id is not in the catalog.
    #[error("unknown outpost {0}")]
    UnknownOutpost(OutpostId),

    /// A provider's `connection_expiry` could not be parsed.
    #[error(transparent)]
    InvalidExpiry(#[from] CoreError),

    /// The catalog file could not be loaded.
    #[error("catalog error: {0}")]
    Catalog(String),
}

impl BrokerError {
    /// Stable snake_case label, used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TokenInvalid => "token_invalid",
            Self::NoCandidateInstance(_) => "no_candidate_instance",
            Self::DestinationUnreachable(_) => "destination_unreachable",
            Self::TransportClosed => "transport_closed",
            Self::UnknownEndpoint(_) => "unknown_endpoint",
            Self::UnknownProvider(_) => "unknown_provider",
            Self::UnknownOutpost(_) => "unknown_outpost",
            Self::InvalidExpiry(_) => "invalid_expiry",
            Self::Catalog(_) => "catalog",
        }
    }
}
