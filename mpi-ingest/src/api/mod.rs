//! HTTP API handlers for mpi-ingest

pub mod auth;
pub mod health;
pub mod plays;
pub mod poison;
pub mod replay;

pub use auth::auth_middleware;
pub use health::health_routes;
pub use plays::relink_plays;
pub use poison::{list_poison, retry_poison};
pub use replay::replay_blocks;
