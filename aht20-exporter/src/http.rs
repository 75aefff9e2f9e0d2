//! HTTP server for the Prometheus metrics endpoint.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::collector::SharedGaugeSet;
use crate::error::{ExporterError, Result};
use crate::poller::wait_for_shutdown;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    gauges: SharedGaugeSet,
}

/// Create the HTTP router.
///
/// The metrics path is routed explicitly; every other request is answered
/// with the same snapshot.
fn create_router(gauges: SharedGaugeSet, metrics_path: &str) -> Router {
    let state = AppState { gauges };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .fallback(metrics_handler)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.gauges.render();

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

/// HTTP server exposing the gauge set.
pub struct HttpServer {
    gauges: SharedGaugeSet,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(gauges: SharedGaugeSet, listen_addr: SocketAddr, metrics_path: String) -> Self {
        Self {
            gauges,
            listen_addr,
            metrics_path,
        }
    }

    /// Bind the listen address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .map_err(|source| ExporterError::Bind {
                addr: self.listen_addr,
                source,
            })?;

        info!(
            addr = %self.listen_addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        Ok(listener)
    }

    /// Serve on an already bound listener until the shutdown signal is received.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let router = create_router(self.gauges, &self.metrics_path);

        // Run server with graceful shutdown
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                wait_for_shutdown(&mut shutdown).await;
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| ExporterError::Server(e.to_string()))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
