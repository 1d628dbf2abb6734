//! HTTP API server for the voice gateway

pub mod audio;
pub mod health;
pub mod speak;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::dispatch::VoicePipeline;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub pipeline: VoicePipeline,
}

/// HTTP + WebSocket server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(pipeline: VoicePipeline, port: u16) -> Self {
        Self {
            state: Arc::new(ApiState { pipeline }),
            port,
        }
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let router = Router::new()
            .nest("/api", speak::router(self.state.clone()))
            .nest("/ws", websocket::router(self.state.clone()))
            .merge(audio::router(self.state.clone()))
            .merge(health::router(self.state.clone()));

        // Displays and the renderer are served from other origins
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
