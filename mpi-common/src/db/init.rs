//! Database initialization
//!
//! Opens (or creates) the SQLite database and creates every table the
//! ingestion service touches. All statements are idempotent and safe to run
//! on every startup.

use crate::config::DbConfig;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Open the database at `db_path` and create the schema
pub async fn init_database(db_path: &Path, db_config: &DbConfig) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // WAL allows readers (poison listing) alongside the single writer
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(db_config.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(db_config.max_connections)
        .acquire_timeout(Duration::from_millis(db_config.acquire_timeout_ms))
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_songs_table(pool).await?;
    create_play_records_table(pool).await?;
    create_poison_records_table(pool).await?;
    create_checkpoint_table(pool).await?;
    Ok(())
}

/// Key-value settings (holds the admin API shared secret)
async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Catalog-owned song rows
///
/// The catalog service creates and edits songs. This crate only resolves
/// `song_hash` to `guid` and increments `play_count` / `earnings`.
/// `earnings` is a canonical decimal string so sums stay exact.
async fn create_songs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS songs (
            guid TEXT PRIMARY KEY,
            song_hash TEXT NOT NULL UNIQUE,
            title TEXT,
            artist_address TEXT,
            play_count INTEGER NOT NULL DEFAULT 0,
            earnings TEXT NOT NULL DEFAULT '0',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// One row per ingested payment event
///
/// The UNIQUE constraint on (transaction_hash, log_index) is what makes
/// insert-or-ignore idempotent across concurrent writers.
async fn create_play_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS play_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            internal_song_id TEXT REFERENCES songs(guid),
            song_identifier TEXT NOT NULL,
            listener_address TEXT NOT NULL,
            gross_amount TEXT NOT NULL,
            protocol_fee TEXT NOT NULL,
            net_amount TEXT NOT NULL,
            payment_type TEXT NOT NULL,
            transaction_hash TEXT NOT NULL,
            log_index INTEGER NOT NULL,
            block_number INTEGER NOT NULL,
            recorded_at TEXT NOT NULL,
            UNIQUE (transaction_hash, log_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_play_records_song ON play_records(song_identifier)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_play_records_unlinked
        ON play_records(id) WHERE internal_song_id IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Quarantined events awaiting retry
async fn create_poison_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS poison_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transaction_hash TEXT NOT NULL,
            log_index INTEGER NOT NULL,
            song_identifier TEXT,
            reason TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 1,
            block_number INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (transaction_hash, log_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Live tailer progress, one row per named cursor
async fn create_checkpoint_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_checkpoint (
            name TEXT PRIMARY KEY,
            last_block INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
