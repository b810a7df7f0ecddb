#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::unused_async)]

//! loctl library — building blocks of the BMC REST bridge.
//!
//! - `session` — BMC session lifecycle, command queue, state cache, poller
//! - `transport` — SSH capability traits and the russh implementation
//! - `config` — configuration loading
//! - `rate_limit` — fixed-window request limiter middleware
//! - `routes` — REST API route handlers
//! - `state` — shared axum application state

pub mod config;
pub mod rate_limit;
pub mod routes;
pub mod session;
pub mod state;
pub mod transport;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use session::BmcSession;
pub use state::AppState;
pub use transport::SshTransport;
