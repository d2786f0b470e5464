//! HTTP server implementation.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::handlers::{action, admission_middleware, health};
use crate::admission::Gatekeeper;
use crate::error::{Result, TurnstileError};

/// Build the router: `/api/action` behind the admission middleware and an
/// ungated `/health`.
pub fn build_router(gate: Arc<Gatekeeper>) -> Router {
    let gated = Router::new()
        .route("/api/action", post(action))
        .route_layer(middleware::from_fn_with_state(gate, admission_middleware));

    Router::new().route("/health", get(health)).merge(gated)
}

/// HTTP server for the admission endpoint.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Admission decisions and auditing
    gate: Arc<Gatekeeper>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, gate: Arc<Gatekeeper>) -> Self {
        Self { addr, gate }
    }

    /// Bind the configured address and serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        Self::serve_on(listener, self.gate, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves.
    pub async fn serve_on<F>(listener: TcpListener, gate: Arc<Gatekeeper>, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "Starting HTTP server with graceful shutdown");

        let app = build_router(gate);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TurnstileError::Server(e.to_string())
        })
    }
}
