//! HTTP request handlers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::extract::{ConnectInfo, State};
use pix_proto::messages::{GeneratePrompt, HandshakeRequest, HandshakeResponse};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

/// `POST /get_credentials` - validator registration handshake.
///
/// The callback endpoint is derived from the connection's source address
/// joined with the reported postfix, so a validator can only register an
/// endpoint at its own address.
pub async fn get_credentials(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<HandshakeRequest>,
) -> ServerResult<Json<HandshakeResponse>> {
    let snapshot = state.stake.current();
    let response = state.issuer.issue(
        &state.registry,
        &snapshot,
        request.uid,
        addr.ip(),
        &request.postfix,
    )?;
    Ok(Json(response))
}

/// `POST /generate` - forward a generation request to the validator pool.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(prompt): Json<GeneratePrompt>,
) -> ServerResult<Json<Value>> {
    if !state.ledger.contains(&prompt.key) {
        warn!("rejected generation request with unknown key");
        return Err(ServerError::Unauthorized);
    }

    let key = prompt.key.clone();
    let model_name = prompt.model_name.clone();
    let payload =
        serde_json::to_value(&prompt).map_err(|e| ServerError::Internal(e.to_string()))?;

    let body = state.dispatcher.dispatch(&key, payload, &model_name).await?;
    info!(model = %model_name, "generation request served");
    Ok(Json(body))
}

/// `GET /health` - liveness and pool summary.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "validators": {
            "known": state.registry.len(),
            "active": state.registry.snapshot_active().len(),
        },
        "stake_members": state.stake.current().len(),
    }))
}
