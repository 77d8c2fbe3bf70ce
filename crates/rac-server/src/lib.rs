//! # rac-server
//!
//! Axum HTTP + `WebSocket` front end of the broker.
//!
//! - `/ws/rac/{token}`: browser clients; the token is resolved before the
//!   upgrade (403 when invalid, 503 when the connection limit is reached)
//! - `/ws/outpost/{outpost}?instance={uid}`: worker control connections
//! - `/ws/outpost_rac/{client_channel}`: worker relay connections
//! - `POST /api/sessions/{session}/logout`: session teardown
//! - `POST /api/endpoints`, `GET /api/users/{user}/endpoints`: endpoint
//!   creation and cached per-user listings
//! - `POST /api/endpoints/{endpoint}/tokens`: connection token issuance
//! - `/health` and `/metrics` (Prometheus)
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod ws;

pub use api::ApiError;
pub use config::ServerConfig;
pub use errors::ServerError;
pub use server::{AppState, RacServer, ServerHandle};
pub use shutdown::{ConnectionGuard, ShutdownCoordinator};
