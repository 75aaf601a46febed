//! HTTP API
//!
//! Thin axum layer over [`IngestionService`]. Every `/api` route expects a
//! `Bearer` session token issued by [`TokenSigner`].

pub mod error;
mod extract;
pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use std::time::Instant;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::auth::TokenSigner;
use crate::ingestion::IngestionService;

pub use error::ErrorResponse;

#[derive(Clone)]
pub struct AppState {
    pub service: IngestionService,
    pub signer: TokenSigner,
    /// Flips to `true` on graceful shutdown; spawned jobs watch it.
    pub shutdown: watch::Receiver<bool>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        service: IngestionService,
        signer: TokenSigner,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            service,
            signer,
            shutdown,
            started_at: Instant::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness))
        .route("/metrics", get(handlers::metrics))
        .route("/api/repos", get(handlers::list_repositories))
        .route("/api/repos/ingest", post(handlers::ingest_repository))
        .route("/api/repos/:id/status", get(handlers::repository_status))
        .route("/api/repos/:id/:kind", get(handlers::recent_entities))
        .route("/api/jobs/:id", get(handlers::job_status))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(state)
}
