//! Player-facing HTTP surface
//!
//! Two routes consume the core: the stream listing and the deferred
//! playback redirect. Everything else (configuration UI, user management)
//! is outside this crate's scope; the handlers here stay deliberately thin
//! over the orchestrator and the playback resolver.

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::debrid::PlaybackResolver;
use crate::models::UserConfig;
use crate::orchestrator::Orchestrator;
use crate::playback::CredentialBox;
use crate::playback::MetadataStore;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub resolver: Arc<PlaybackResolver>,
    pub credentials: Arc<CredentialBox>,
    pub metadata_store: Arc<MetadataStore>,
    pub config: Arc<Config>,
    /// Configuration served when no user store is wired up
    pub default_user: Arc<UserConfig>,
}

/// Build the router over a prepared application state
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stream/{type}/{id}", get(handlers::stream))
        .route(
            "/playback/{auth}/{file_info}/{metadata_id}/{filename}",
            get(handlers::playback),
        )
        .route("/health", get(handlers::health))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Owns the listening socket and serves the router until shutdown
pub struct WebServer {
    host: String,
    port: u16,
    state: AppState,
}

impl WebServer {
    pub fn new(host: String, port: u16, state: AppState) -> Self {
        Self { host, port, state }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(%addr, "listening");
        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutdown signal received");
            })
            .await?;
        Ok(())
    }
}
