//! JSON management routes: endpoints and connection tokens.
//!
//! Callers are expected to be authenticated upstream; these routes trust
//! the session key and user they are given.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rac_broker::BrokerError;
use rac_core::{ConnectionToken, Endpoint, EndpointId, SessionKey};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::server::AppState;

/// A broker error surfaced over HTTP.
#[derive(Debug)]
pub struct ApiError(pub BrokerError);

impl ApiError {
    /// HTTP status for the wrapped error.
    ///
    /// - unknown endpoint: 404
    /// - unknown provider, bad provider expiry: 422
    /// - anything else: 500
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            BrokerError::UnknownEndpoint(_) => StatusCode::NOT_FOUND,
            BrokerError::UnknownProvider(_) | BrokerError::InvalidExpiry(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            warn!(error = %self.0, "management request failed");
            "internal error".to_owned()
        } else {
            self.0.to_string()
        };
        let body = json!({ "error": self.0.kind(), "message": message });
        (status, Json(body)).into_response()
    }
}

/// POST /api/endpoints
///
/// Creating an endpoint drops every cached per-user listing.
pub(crate) async fn create_endpoint_handler(
    State(state): State<AppState>,
    Json(endpoint): Json<Endpoint>,
) -> Result<(StatusCode, Json<Endpoint>), ApiError> {
    state.tokens.add_endpoint(endpoint.clone())?;
    info!(endpoint = %endpoint.id, provider = %endpoint.provider, "endpoint stored");
    Ok((StatusCode::CREATED, Json(endpoint)))
}

/// GET /api/users/{user}/endpoints
pub(crate) async fn list_endpoints_handler(
    Path(user): Path<String>,
    State(state): State<AppState>,
) -> Json<Vec<Endpoint>> {
    Json(state.tokens.endpoints_for(&user).as_ref().clone())
}

/// Body of a token request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IssueRequest {
    session: SessionKey,
    #[serde(default)]
    settings: Map<String, Value>,
}

/// POST /api/endpoints/{endpoint}/tokens
///
/// Issues a token whose lifetime is the provider's `connectionExpiry`.
pub(crate) async fn issue_token_handler(
    Path(endpoint): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<IssueRequest>,
) -> Result<(StatusCode, Json<ConnectionToken>), ApiError> {
    let token = state
        .tokens
        .issue(&EndpointId::from(endpoint), req.session, req.settings)?;
    Ok((StatusCode::CREATED, Json(token)))
}
