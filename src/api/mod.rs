//! HTTP and WebSocket surface
//!
//! - `GET /health` liveness and live call count
//! - `GET|POST /voice` call setup markup for the telephony provider
//! - `GET /media` media stream WebSocket, one turn controller per connection
//! - `GET|POST /calls` list live calls, place an outbound call
//! - `POST /calls/{stream_sid}/tone` diagnostic tone on a live call

pub mod calls;
pub mod health;
pub mod media_stream;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use url::Url;

use crate::call::{CallServices, SessionRegistry};
use crate::telephony::TwilioClient;
use crate::Result;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Engines handed to every new call
    pub services: CallServices,
    /// Live calls
    pub registry: SessionRegistry,
    /// Outbound call placement, when credentials are configured
    pub telephony: Option<Arc<TwilioClient>>,
    /// Externally reachable base URL
    pub public_url: Option<Url>,
}

impl std::fmt::Debug for ApiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiState")
            .field("services", &self.services)
            .field("telephony", &self.telephony)
            .field("public_url", &self.public_url)
            .finish_non_exhaustive()
    }
}

/// Build the router with all routes
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health::router(state.clone()))
        .merge(calls::router(state.clone()))
        .merge(media_stream::router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// API server
#[derive(Debug)]
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(state: ApiState, port: u16) -> Self {
        Self {
            state: Arc::new(state),
            port,
        }
    }

    /// Run until `shutdown` resolves, then disconnect every live call
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        let registry = self.state.registry.clone();
        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(async move {
                shutdown.await;
                registry.close_all("server shutting down").await;
            })
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}
