//! Server power endpoints.
//!
//! - `GET /power` — last-known power state (cache read, no device round trip)
//! - `GET /power/on` — queue a power-on
//! - `GET /power/off` — queue a power-off
//!
//! All three answer `503` while the BMC session is not Ready. The
//! transitions answer `409` when the cached state already matches the
//! target or the same transition is already queued.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use super::{service_unavailable, submit_transition};
use crate::session::command::BmcCommand;
use crate::state::AppState;

/// `GET /power` — cached power state.
pub async fn power_status(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    if !state.session.is_ready().await {
        return service_unavailable();
    }
    let powered_on = state.session.power().await.is_on();
    (
        StatusCode::OK,
        Json(json!({"powered_on": powered_on, "code": 200})),
    )
}

/// `GET /power/on` — queue a power-on command.
pub async fn power_on(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    submit_transition(&state, BmcCommand::PowerOn).await
}

/// `GET /power/off` — queue a power-off command.
pub async fn power_off(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    submit_transition(&state, BmcCommand::PowerOff).await
}
