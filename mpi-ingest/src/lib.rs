//! mpi-ingest library
//!
//! Ingests `PaymentProcessed` events into the relational store:
//! Log Source -> Event Decoder -> Idempotent Upsert Engine ->
//! PlayRecord + song aggregate, or the Poison Queue on failure.
//! Replay, retry and live tailing all re-enter the same pipeline.

use axum::Router;
use chrono::{DateTime, Utc};
use mpi_common::config::IngestLimits;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod chain;
pub mod db;
pub mod decoder;
pub mod error;
pub mod ingest;

use ingest::IngestServices;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Shared secret for admin API authentication (0 disables checking)
    pub shared_secret: i64,
    pub services: IngestServices,
    pub limits: IngestLimits,
    /// Root shutdown token; request-scoped work runs on child tokens
    pub shutdown: CancellationToken,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        shared_secret: i64,
        services: IngestServices,
        limits: IngestLimits,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            shared_secret,
            services,
            limits,
            shutdown,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
///
/// `/health` is public; everything under `/admin` passes the auth check
/// before any handler runs.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};

    let admin = Router::new()
        .route("/admin/replay", post(api::replay_blocks))
        .route("/admin/poison", get(api::list_poison))
        .route("/admin/poison/retry", post(api::retry_poison))
        .route("/admin/plays/relink", post(api::relink_plays))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth_middleware,
        ));

    Router::new()
        .merge(admin)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
