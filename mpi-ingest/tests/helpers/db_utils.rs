//! Database test utilities

use alloy_primitives::{hex, B256};
use mpi_common::IngestConfig;
use mpi_ingest::db::catalog;
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Fresh in-memory database with the full schema
///
/// One connection that never expires, so the in-memory database lives as
/// long as the pool.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    mpi_common::db::init_schema(&pool)
        .await
        .expect("Failed to initialize schema");

    pool
}

/// File-backed database opened the way the service opens it
///
/// Uses the configured connection count (several writers, WAL). Keep the
/// returned directory alive for as long as the pool.
pub async fn file_pool(config: &mut IngestConfig) -> (TempDir, SqlitePool) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    config.root_folder = temp_dir.path().to_path_buf();

    let pool = mpi_ingest::db::init_database_pool(config)
        .await
        .expect("Failed to open file database");

    (temp_dir, pool)
}

/// Register a catalog song whose hash is `song_id`
pub async fn insert_song(pool: &SqlitePool, guid: &str, song_id: B256) {
    sqlx::query("INSERT INTO songs (guid, song_hash, title) VALUES (?, ?, ?)")
        .bind(guid)
        .bind(hex::encode_prefixed(song_id))
        .bind(format!("Song {}", guid))
        .execute(pool)
        .await
        .expect("Failed to insert song");
}

pub async fn aggregate(pool: &SqlitePool, guid: &str) -> (i64, Decimal) {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    catalog::song_aggregate(&mut *conn, guid)
        .await
        .expect("Failed to read aggregate")
        .expect("Song missing")
}

pub async fn play_record_count(pool: &SqlitePool) -> i64 {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM play_records")
        .fetch_one(pool)
        .await
        .expect("Failed to count play records");
    count
}

pub async fn poison_count(pool: &SqlitePool) -> i64 {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM poison_records")
        .fetch_one(pool)
        .await
        .expect("Failed to count poison records");
    count
}

/// Make every aggregate update fail
pub async fn break_aggregate_updates(pool: &SqlitePool) {
    sqlx::query(
        r#"
        CREATE TRIGGER fail_song_update BEFORE UPDATE ON songs
        BEGIN
            SELECT RAISE(ABORT, 'forced aggregate failure');
        END
        "#,
    )
    .execute(pool)
    .await
    .expect("Failed to create trigger");
}

pub async fn restore_aggregate_updates(pool: &SqlitePool) {
    sqlx::query("DROP TRIGGER fail_song_update")
        .execute(pool)
        .await
        .expect("Failed to drop trigger");
}

/// Make every poison queue write fail
pub async fn break_poison_writes(pool: &SqlitePool) {
    sqlx::query(
        r#"
        CREATE TRIGGER fail_poison_insert BEFORE INSERT ON poison_records
        BEGIN
            SELECT RAISE(ABORT, 'forced poison failure');
        END
        "#,
    )
    .execute(pool)
    .await
    .expect("Failed to create trigger");
}

pub async fn restore_poison_writes(pool: &SqlitePool) {
    sqlx::query("DROP TRIGGER fail_poison_insert")
        .execute(pool)
        .await
        .expect("Failed to drop trigger");
}

/// Set the admin API shared secret (0 disables auth)
pub async fn set_shared_secret(pool: &SqlitePool, secret: i64) {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES ('api_shared_secret', ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(secret.to_string())
    .execute(pool)
    .await
    .expect("Failed to set shared secret");
}
