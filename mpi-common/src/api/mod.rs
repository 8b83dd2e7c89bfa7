//! Admin API helpers shared between the service and its operator tooling
//!
//! Contains only pure functions and database operations; the axum
//! middleware that applies them lives in `mpi-ingest`.

pub mod auth;

pub use auth::{
    calculate_signature, initialize_shared_secret, load_shared_secret, validate_signature,
    validate_timestamp, ApiAuthError, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
