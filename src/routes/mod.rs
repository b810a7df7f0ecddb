//! HTTP route handlers.
//!
//! Each sub-module corresponds to an API endpoint group. Handlers never
//! touch the transport: they read the session's state cache or enqueue a
//! command and answer as soon as the entry is accepted. Response bodies
//! all carry a `code` field mirroring the HTTP status.

pub mod power;
pub mod root;
pub mod uid;

use axum::{http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::session::command::{BmcCommand, CommandError};
use crate::state::AppState;

/// `503` body used by every endpoint that needs a Ready session.
pub(crate) fn service_unavailable() -> (StatusCode, Json<Value>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"message": "SSH not connected", "code": 503})),
    )
}

/// Enqueue a user-originated transition and map the result to a response.
///
/// Accepted entries answer `202` immediately; the command's eventual
/// outcome is consumed by a spawned observer that only logs, since the
/// HTTP client has long since been told "accepted".
pub(crate) async fn submit_transition(
    state: &AppState,
    command: BmcCommand,
) -> (StatusCode, Json<Value>) {
    match state.session.submit(command).await {
        Ok(rx) => {
            tokio::spawn(async move {
                match rx.await {
                    Ok(Ok(outcome)) => {
                        debug!("{} completed: {outcome:?}", command.device_command());
                    }
                    Ok(Err(e)) => {
                        warn!("{} failed after accept: {e}", command.device_command());
                    }
                    // Sender dropped without resolving (shutdown) — nothing to log.
                    Err(_) => {}
                }
            });
            (
                StatusCode::ACCEPTED,
                Json(json!({"message": "Command added to queue", "code": 202})),
            )
        }
        Err(CommandError::NotConnected) => service_unavailable(),
        Err(CommandError::AlreadyInState | CommandError::AlreadyQueued) => {
            let message = if command.target_on() == Some(true) {
                "Already on"
            } else {
                "Already off"
            };
            (
                StatusCode::CONFLICT,
                Json(json!({"message": message, "code": 409})),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"message": e.to_string(), "code": 500})),
        ),
    }
}
