//! Global fixed-window request limiter.
//!
//! The BMC behind this service copes badly with request floods — every
//! accepted action ends up on its single command channel — so the limiter
//! sits in front of all routes, including `/`. One shared window, no
//! per-client tracking.

use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tokio::sync::Mutex;

use crate::state::AppState;

/// Counts requests within a fixed window; resets when the window rolls.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    inner: Mutex<Window>,
}

struct Window {
    started: Instant,
    count: u32,
}

impl RateLimiter {
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            inner: Mutex::new(Window {
                started: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Account for one request. Returns `false` when the current window's
    /// budget is exhausted.
    pub async fn try_acquire(&self) -> bool {
        let mut window = self.inner.lock().await;
        if window.started.elapsed() >= self.window {
            window.started = Instant::now();
            window.count = 0;
        }
        if window.count >= self.max_requests {
            return false;
        }
        window.count += 1;
        true
    }
}

/// Axum middleware rejecting requests over the configured rate.
pub async fn limit_requests(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state.rate_limiter.try_acquire().await {
        next.run(request).await
    } else {
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "message": "Too many requests, please try again later.",
                "code": 429
            })),
        )
            .into_response()
    }
}
