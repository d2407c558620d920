//! # pix-gateway-server
//!
//! HTTP server for the Pixnet generation gateway.
//!
//! Exposes the registration handshake (`POST /get_credentials`), the
//! client generation endpoint (`POST /generate`), and a liveness probe
//! (`GET /health`), and hosts the background stake-sync and
//! health-monitor tasks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;

pub use config::GatewayConfig;
pub use error::{ServerError, ServerResult};
pub use server::GatewayServer;
pub use state::AppState;
