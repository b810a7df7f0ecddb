//! UID indicator endpoints — the chassis identification LED.
//!
//! - `GET /uid` — last-known indicator state (cache read)
//! - `GET /uid/on` — queue an indicator-on
//! - `GET /uid/off` — queue an indicator-off
//!
//! Same status contract as the power endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use super::{service_unavailable, submit_transition};
use crate::session::command::BmcCommand;
use crate::state::AppState;

/// `GET /uid` — cached indicator state.
pub async fn uid_status(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    if !state.session.is_ready().await {
        return service_unavailable();
    }
    let powered_on = state.session.indicator().await.is_on();
    (
        StatusCode::OK,
        Json(json!({"powered_on": powered_on, "code": 200})),
    )
}

/// `GET /uid/on` — queue an indicator-on command.
pub async fn uid_on(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    submit_transition(&state, BmcCommand::IndicatorOn).await
}

/// `GET /uid/off` — queue an indicator-off command.
pub async fn uid_off(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    submit_transition(&state, BmcCommand::IndicatorOff).await
}
