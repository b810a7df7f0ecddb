#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # loctl
//!
//! Lights-out management REST bridge.
//!
//! loctl exposes a small HTTP API over a BMC's interactive SSH command
//! shell. The controller only tolerates one session and one command at a
//! time, so every request funnels through a single serialized command
//! queue; a background poller keeps the cached power and UID indicator
//! state fresh, and the session reconnects forever when the controller
//! drops the link.
//!
//! ## API surface
//!
//! | Method | Path         | Description                                |
//! |--------|--------------|--------------------------------------------|
//! | GET    | `/`          | Service banner / liveness                  |
//! | GET    | `/power`     | Last-known power state                     |
//! | GET    | `/power/on`  | Queue power-on (202) or conflict (409)     |
//! | GET    | `/power/off` | Queue power-off (202) or conflict (409)    |
//! | GET    | `/uid`       | Last-known UID indicator state             |
//! | GET    | `/uid/on`    | Queue indicator-on                         |
//! | GET    | `/uid/off`   | Queue indicator-off                        |
//!
//! Everything except `/` answers `503 {"message":"SSH not connected"}`
//! until the BMC session is Ready. A global fixed-window rate limiter
//! answers `429` in front of all routes.
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, router setup, graceful shutdown
//! config.rs        — TOML + env-var configuration
//! rate_limit.rs    — fixed-window limiter middleware
//! transport.rs     — SSH capability traits, russh implementation
//! session/
//!   command.rs     — closed command set, queue entries, outcome types
//!   interpret.rs   — response text → typed result
//!   mod.rs         — BmcSession (lifecycle, queue worker, poller)
//! routes/
//!   root.rs        — GET /
//!   power.rs       — GET /power, /power/on, /power/off
//!   uid.rs         — GET /uid, /uid/on, /uid/off
//! ```

mod config;
mod rate_limit;
mod routes;
mod session;
mod state;
mod transport;

use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, routing::get, Router};
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use config::Config;
use rate_limit::RateLimiter;
use session::BmcSession;
use state::AppState;
use transport::SshTransport;

/// Lights-out management REST bridge.
#[derive(Parser)]
#[command(name = "loctl", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref());

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("loctl v{} starting", env!("CARGO_PKG_VERSION"));
    info!("BMC endpoint: {}:{}", config.bmc.host, config.bmc.port);
    info!("Listening on {}", config.server.listen);

    if config.bmc.host.is_empty() {
        warn!("No BMC host configured — set LOCTL_BMC_HOST or [bmc] host");
    }

    let transport = Arc::new(SshTransport::new(config.bmc.clone()));
    let session = BmcSession::new(transport, config.bmc.clone(), config.poller.clone());
    session.start().await;

    let rate_limiter = Arc::new(RateLimiter::new(
        config.server.rate_limit_max_requests,
        Duration::from_secs(config.server.rate_limit_window_secs),
    ));

    let state = AppState {
        config: Arc::new(config),
        session: session.clone(),
        rate_limiter,
    };

    let app = Router::new()
        .route("/", get(routes::root::root))
        .route("/power", get(routes::power::power_status))
        .route("/power/on", get(routes::power::power_on))
        .route("/power/off", get(routes::power::power_off))
        .route("/uid", get(routes::uid::uid_status))
        .route("/uid/on", get(routes::uid::uid_on))
        .route("/uid/off", get(routes::uid::uid_off))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_requests,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let listener = TcpListener::bind(&state.config.server.listen)
        .await
        .expect("Failed to bind");

    info!("Server ready");

    // Graceful shutdown
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server error");

    info!("Shutting down...");
    session.stop().await;
    info!("Goodbye");
}
