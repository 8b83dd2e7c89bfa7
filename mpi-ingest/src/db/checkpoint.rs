//! Tailer checkpoint persistence

use chrono::Utc;
use sqlx::SqlitePool;

/// Last fully processed block for a named cursor
pub async fn load_checkpoint(pool: &SqlitePool, name: &str) -> Result<Option<u64>, sqlx::Error> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT last_block FROM ingest_checkpoint WHERE name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await?;

    Ok(row.map(|(b,)| b.max(0) as u64))
}

/// Record `last_block` as fully processed
pub async fn save_checkpoint(pool: &SqlitePool, name: &str, last_block: u64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO ingest_checkpoint (name, last_block, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            last_block = excluded.last_block,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(name)
    .bind(last_block as i64)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}
