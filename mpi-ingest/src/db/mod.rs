//! Database access for mpi-ingest
//!
//! Free functions over a SQLite connection or pool. Functions that must run
//! inside the Upsert Engine's transaction take `&mut SqliteConnection` so
//! callers pass `&mut *tx`.

pub mod catalog;
pub mod checkpoint;
pub mod plays;
pub mod poison;

use mpi_common::IngestConfig;
use sqlx::{Sqlite, SqlitePool, Transaction};

/// Open the shared database and ensure the schema exists
pub async fn init_database_pool(config: &IngestConfig) -> mpi_common::Result<SqlitePool> {
    let db_path = config.database_path();
    tracing::debug!("Connecting to database: {}", db_path.display());
    mpi_common::db::init_database(&db_path, &config.db).await
}

/// Open a write transaction
///
/// `BEGIN IMMEDIATE` takes the write lock before the first read, so the
/// busy timeout covers waiting on another writer.
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
    pool.begin_with("BEGIN IMMEDIATE").await
}
