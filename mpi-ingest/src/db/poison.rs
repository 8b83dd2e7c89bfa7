//! PoisonRecord persistence

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

/// Quarantined event as exposed to operators
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoisonRecord {
    pub transaction_hash: String,
    pub log_index: i64,
    pub song_identifier: Option<String>,
    pub reason: String,
    pub attempts: i64,
    pub block_number: Option<i64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub updated_at: DateTime<Utc>,
}

/// Listing order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrder {
    NewestFirst,
    OldestFirst,
}

/// Insert with attempts=1, or bump attempts and replace the reason
#[allow(clippy::too_many_arguments)]
pub async fn upsert_poison_record(
    pool: &SqlitePool,
    transaction_hash: &str,
    log_index: i64,
    song_identifier: Option<&str>,
    reason: &str,
    block_number: Option<i64>,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO poison_records (
            transaction_hash, log_index, song_identifier, reason,
            attempts, block_number, created_at, updated_at
        ) VALUES (?, ?, ?, ?, 1, ?, ?, ?)
        ON CONFLICT(transaction_hash, log_index) DO UPDATE SET
            reason = excluded.reason,
            attempts = poison_records.attempts + 1,
            song_identifier = COALESCE(excluded.song_identifier, poison_records.song_identifier),
            block_number = COALESCE(excluded.block_number, poison_records.block_number),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(transaction_hash)
    .bind(log_index)
    .bind(song_identifier)
    .bind(reason)
    .bind(block_number)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Read up to `limit` poison records
///
/// Order follows first-quarantine sequence; the autoincrement id breaks
/// timestamp ties.
pub async fn list_poison_records(
    pool: &SqlitePool,
    limit: u32,
    order: ListOrder,
) -> Result<Vec<PoisonRecord>, sqlx::Error> {
    let sql = match order {
        ListOrder::NewestFirst => {
            r#"
            SELECT transaction_hash, log_index, song_identifier, reason, attempts,
                   block_number, created_at, updated_at
            FROM poison_records
            ORDER BY id DESC
            LIMIT ?
            "#
        }
        ListOrder::OldestFirst => {
            r#"
            SELECT transaction_hash, log_index, song_identifier, reason, attempts,
                   block_number, created_at, updated_at
            FROM poison_records
            ORDER BY id ASC
            LIMIT ?
            "#
        }
    };

    sqlx::query_as(sql).bind(limit as i64).fetch_all(pool).await
}

/// Delete a poison record; returns `true` if one existed
pub async fn delete_poison_record(
    pool: &SqlitePool,
    transaction_hash: &str,
    log_index: i64,
) -> Result<bool, sqlx::Error> {
    let result =
        sqlx::query("DELETE FROM poison_records WHERE transaction_hash = ? AND log_index = ?")
            .bind(transaction_hash)
            .bind(log_index)
            .execute(pool)
            .await?;

    Ok(result.rows_affected() > 0)
}

/// Fetch a single poison record by key
pub async fn get_poison_record(
    pool: &SqlitePool,
    transaction_hash: &str,
    log_index: i64,
) -> Result<Option<PoisonRecord>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT transaction_hash, log_index, song_identifier, reason, attempts,
               block_number, created_at, updated_at
        FROM poison_records
        WHERE transaction_hash = ? AND log_index = ?
        "#,
    )
    .bind(transaction_hash)
    .bind(log_index)
    .fetch_optional(pool)
    .await
}
