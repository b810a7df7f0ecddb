//! Service banner endpoint.

use axum::{http::StatusCode, Json};
use serde_json::{json, Value};

/// `GET /` — identifies the service. Available even when the BMC session
/// is down, so it doubles as a liveness probe.
pub async fn root() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({"message": "loctl BMC REST bridge", "code": 200})),
    )
}
