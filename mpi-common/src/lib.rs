//! # MPI Common Library
//!
//! Shared code for the music payment ingestion service:
//! - Error type shared by all crates
//! - Configuration loading and resolution
//! - Database initialization and schema
//! - Admin API shared-secret authentication helpers

pub mod api;
pub mod config;
pub mod db;
pub mod error;

pub use config::IngestConfig;
pub use error::{Error, Result};
