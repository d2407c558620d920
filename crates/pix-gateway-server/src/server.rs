//! Gateway server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::error::{ServerError, ServerResult};
use crate::routes::create_router;
use crate::state::AppState;

/// HTTP front of the gateway.
///
/// Serves the registration handshake, the generation endpoint, and a
/// liveness probe on top of shared [`AppState`].
#[derive(Clone)]
pub struct GatewayServer {
    state: Arc<AppState>,
}

impl GatewayServer {
    /// Create a server over existing state.
    #[must_use]
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Get the shared state for external access.
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Start the server and listen for connections.
    ///
    /// Runs until the server encounters a fatal error.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn serve(&self, addr: SocketAddr) -> ServerResult<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(addr, e))?;

        info!(addr = %addr, "gateway listening");

        let router = create_router(Arc::clone(&self.state));

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?;

        Ok(())
    }

    /// Start the server with graceful shutdown support.
    ///
    /// The server shuts down when the provided future completes.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn serve_with_shutdown<F>(&self, addr: SocketAddr, shutdown: F) -> ServerResult<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(addr, e))?;

        info!(addr = %addr, "gateway listening");

        let router = create_router(Arc::clone(&self.state));

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?;

        Ok(())
    }
}
