//! `RacServer`: Axum HTTP + WebSocket gateway.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ::metrics::{counter, gauge};
use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use rac_broker::{
    BrokerContext, BrokerError, InstanceDirectory, LOGOUT_REASON, SessionConfig, SessionTeardown,
    TokenResolver, TokenStore, run_client_session, run_outpost_control, run_worker_relay,
};
use rac_core::{ChannelName, DisplayHints, InstanceUid, OutpostId, SessionKey};
use rac_fabric::ChannelLayer;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::api;
use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics::{
    TOKENS_PURGED_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_REJECTED_TOTAL,
};
use crate::shutdown::{ConnectionGuard, ShutdownCoordinator};
use crate::ws::WsTransport;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Broker collaborators handed to every session task.
    pub broker: BrokerContext,
    /// Token store, for revocation on logout.
    pub tokens: Arc<TokenStore>,
    /// Disconnects every client of a session.
    pub teardown: SessionTeardown,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Listener configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The gateway server.
pub struct RacServer {
    state: AppState,
}

impl RacServer {
    /// Assemble a server around `tokens` and `directory`.
    pub fn new(
        config: ServerConfig,
        session: SessionConfig,
        tokens: Arc<TokenStore>,
        directory: Arc<dyn InstanceDirectory>,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let layer = ChannelLayer::new(config.channel_capacity);
        let resolver: Arc<dyn TokenResolver> = tokens.clone();
        let broker = BrokerContext::new(layer.clone(), resolver, directory, session, shutdown.token());
        Self {
            state: AppState {
                broker,
                tokens,
                teardown: SessionTeardown::new(layer),
                shutdown,
                config: Arc::new(config),
                start_time: Instant::now(),
                metrics: None,
            },
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws/rac/{token}", get(client_ws_handler))
            .route("/ws/outpost/{outpost}", get(outpost_ws_handler))
            .route("/ws/outpost_rac/{client_channel}", get(relay_ws_handler))
            .route("/api/sessions/{session}/logout", post(logout_handler))
            .route("/api/endpoints", post(api::create_endpoint_handler))
            .route("/api/endpoints/{endpoint}/tokens", post(api::issue_token_handler))
            .route("/api/users/{user}/endpoints", get(api::list_endpoints_handler))
            .with_state(self.state.clone())
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
    }

    /// The broker context session tasks run with.
    pub fn broker(&self) -> &BrokerContext {
        &self.state.broker
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// The listener configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Bind, start serving and start the token sweeper.
    pub async fn listen(self) -> Result<ServerHandle, ServerError> {
        let listener = tokio::net::TcpListener::bind(self.state.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();

        let serve_token = token.clone();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(serve_token.cancelled_owned())
                .await
            {
                warn!(error = %e, "server stopped with error");
            }
        });
        let sweeper = spawn_token_sweeper(
            self.state.tokens.clone(),
            self.state.config.token_sweep_interval(),
            token,
        );
        info!(%addr, "rac gateway listening");

        Ok(ServerHandle {
            addr,
            shutdown: self.state.shutdown.clone(),
            broker: self.state.broker.clone(),
            tasks: vec![server, sweeper],
        })
    }
}

/// A running server.
pub struct ServerHandle {
    /// Bound address.
    pub addr: SocketAddr,
    shutdown: Arc<ShutdownCoordinator>,
    broker: BrokerContext,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// The broker context session tasks run with.
    pub fn broker(&self) -> &BrokerContext {
        &self.broker
    }

    /// The coordinator admitting this server's connections.
    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Stop accepting, close every session and wait up to `timeout` for
    /// their tasks to finish.
    pub async fn shutdown(self, timeout: Option<Duration>) {
        self.shutdown.graceful_shutdown(self.tasks, timeout).await;
    }
}

/// Periodically delete expired tokens until `token` is cancelled.
pub fn spawn_token_sweeper(
    tokens: Arc<TokenStore>,
    every: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        loop {
            tokio::select! {
                _ = ticks.tick() => {
                    let purged = tokens.purge_expired();
                    if purged > 0 {
                        counter!(TOKENS_PURGED_TOTAL).increment(purged as u64);
                        info!(purged, "expired connection tokens removed");
                    }
                }
                () = token.cancelled() => break,
            }
        }
    })
}

// ─── Connection accounting ──────────────────────────────────────────────────

/// One unit of the connection limit, held for the life of the upgraded
/// task so shutdown can wait for it.
struct ConnectionSlot {
    _guard: ConnectionGuard,
}

impl ConnectionSlot {
    fn acquire(shutdown: &Arc<ShutdownCoordinator>, max: usize, role: &'static str) -> Option<Self> {
        let guard = shutdown.admit(max)?;
        counter!(WS_CONNECTIONS_TOTAL, "role" => role).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        Some(Self { _guard: guard })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    }
}

fn reject(status: StatusCode, reason: &'static str) -> Response {
    counter!(WS_REJECTED_TOTAL, "reason" => reason).increment(1);
    (status, reason).into_response()
}

fn acquire_slot(state: &AppState, role: &'static str) -> Result<ConnectionSlot, Response> {
    if state.shutdown.is_shutting_down() {
        return Err(reject(StatusCode::SERVICE_UNAVAILABLE, "shutting down"));
    }
    ConnectionSlot::acquire(&state.shutdown, state.config.max_connections, role).ok_or_else(|| {
        warn!(max = state.config.max_connections, "connection limit reached");
        reject(StatusCode::SERVICE_UNAVAILABLE, "too many connections")
    })
}

// ─── Handlers ───────────────────────────────────────────────────────────────

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.shutdown.is_shutting_down(),
        state.shutdown.connection_count(),
        state.broker.stats.active(),
        state.broker.stats.paired(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// GET /ws/rac/{token}: a browser client.
///
/// The token is resolved before upgrading so an invalid token is refused
/// with a plain 403 rather than an open-then-close.
async fn client_ws_handler(
    Path(token): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let hints = DisplayHints::from_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    let params = match state.broker.tokens.resolve(&token, hints).await {
        Ok(params) => params,
        Err(BrokerError::TokenInvalid) => {
            debug!("connection token refused");
            return reject(StatusCode::FORBIDDEN, "invalid token");
        }
        Err(e) => {
            warn!(error = %e, kind = e.kind(), "connection token unusable");
            return reject(StatusCode::FORBIDDEN, "invalid token");
        }
    };
    let slot = match acquire_slot(&state, "client") {
        Ok(slot) => slot,
        Err(resp) => return resp,
    };

    ws.protocols([state.config.subprotocol.clone()])
        .max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let _slot = slot;
            let mut transport = WsTransport::new(socket);
            let _ = run_client_session(&state.broker, params, &mut transport).await;
        })
}

/// Query of a worker control connection.
#[derive(Debug, Deserialize)]
struct InstanceQuery {
    instance: Option<String>,
}

/// GET /ws/outpost/{outpost}?instance={uid}: a worker control connection.
async fn outpost_ws_handler(
    Path(outpost): Path<String>,
    Query(query): Query<InstanceQuery>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(instance) = query.instance.filter(|i| !i.is_empty()) else {
        return reject(StatusCode::BAD_REQUEST, "missing instance");
    };
    let outpost = OutpostId::from(outpost);
    if !state.broker.directory.knows_outpost(&outpost).await {
        return reject(StatusCode::NOT_FOUND, "unknown outpost");
    }
    let slot = match acquire_slot(&state, "worker_control") {
        Ok(slot) => slot,
        Err(resp) => return resp,
    };

    let instance = InstanceUid::from(instance);
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let _slot = slot;
            let mut transport = WsTransport::new(socket);
            let _ = run_outpost_control(&state.broker, outpost, instance, &mut transport).await;
        })
}

/// GET /ws/outpost_rac/{client_channel}: a worker relay connection.
async fn relay_ws_handler(
    Path(client_channel): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let client_channel = ChannelName::from(client_channel);
    if !state.broker.layer.has_channel(&client_channel) {
        return reject(StatusCode::NOT_FOUND, "unknown client channel");
    }
    let slot = match acquire_slot(&state, "worker_relay") {
        Ok(slot) => slot,
        Err(resp) => return resp,
    };

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let _slot = slot;
            let mut transport = WsTransport::new(socket);
            let _ = run_worker_relay(&state.broker, client_channel, &mut transport).await;
        })
}

/// Body of a logout response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogoutResponse {
    session: SessionKey,
    disconnected: usize,
    revoked_tokens: usize,
}

/// POST /api/sessions/{session}/logout
async fn logout_handler(
    Path(session): Path<String>,
    State(state): State<AppState>,
) -> Json<LogoutResponse> {
    let session = SessionKey::from(session);
    let revoked_tokens = state.tokens.revoke_session(&session);
    let disconnected = state.teardown.end_session(&session, LOGOUT_REASON);
    Json(LogoutResponse {
        session,
        disconnected,
        revoked_tokens,
    })
}
