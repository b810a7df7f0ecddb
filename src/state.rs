//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;

use crate::config::Config;
use crate::rate_limit::RateLimiter;
use crate::session::BmcSession;

/// Shared application state for the loctl server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Handle to the BMC session: command queue, state cache, status.
    pub session: BmcSession,
    /// Global request limiter applied in front of every route.
    pub rate_limiter: Arc<RateLimiter>,
}
