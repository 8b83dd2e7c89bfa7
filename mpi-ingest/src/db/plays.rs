//! PlayRecord persistence
//!
//! Rows are created once per `(transaction_hash, log_index)` and never
//! updated, except for the nullable `internal_song_id` backfill.

use alloy_primitives::hex;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use crate::decoder::PaymentEvent;

/// Stored play record
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayRecord {
    pub id: i64,
    pub internal_song_id: Option<String>,
    pub song_identifier: String,
    pub listener_address: String,
    pub gross_amount: String,
    pub protocol_fee: String,
    pub net_amount: String,
    pub payment_type: String,
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_number: i64,
    pub recorded_at: DateTime<Utc>,
}

/// Unlinked record candidate for song-link backfill
#[derive(Debug, Clone, FromRow)]
pub struct UnlinkedPlay {
    pub id: i64,
    pub song_identifier: String,
    pub net_amount: String,
}

/// Insert a play record unless its key already exists
///
/// Returns `true` if a new row was written. Only the unique-key conflict is
/// absorbed; every other constraint failure is returned as an error.
pub async fn insert_play_record(
    conn: &mut SqliteConnection,
    event: &PaymentEvent,
    internal_song_id: Option<&str>,
    recorded_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO play_records (
            internal_song_id, song_identifier, listener_address,
            gross_amount, protocol_fee, net_amount, payment_type,
            transaction_hash, log_index, block_number, recorded_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(transaction_hash, log_index) DO NOTHING
        "#,
    )
    .bind(internal_song_id)
    .bind(event.song_identifier_hex())
    .bind(hex::encode_prefixed(event.listener))
    .bind(event.gross_amount.to_string())
    .bind(event.protocol_fee.to_string())
    .bind(event.net_amount.to_string())
    .bind(event.payment_type.as_str())
    .bind(hex::encode_prefixed(event.transaction_hash))
    .bind(event.log_index as i64)
    .bind(event.block_number as i64)
    .bind(recorded_at)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Whether a play record exists for the key
pub async fn play_record_exists(
    conn: &mut SqliteConnection,
    transaction_hash: &str,
    log_index: i64,
) -> Result<bool, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM play_records WHERE transaction_hash = ? AND log_index = ?",
    )
    .bind(transaction_hash)
    .bind(log_index)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.is_some())
}

/// Oldest unlinked play records whose song the catalog now knows
///
/// Records for songs still missing from the catalog are skipped, so they
/// never crowd linkable records out of a batch.
pub async fn fetch_linkable(pool: &SqlitePool, limit: u32) -> Result<Vec<UnlinkedPlay>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT p.id, p.song_identifier, p.net_amount
        FROM play_records p
        WHERE p.internal_song_id IS NULL
          AND EXISTS (
              SELECT 1 FROM songs s
              WHERE lower(s.song_hash) IN (
                  lower(p.song_identifier),
                  substr(lower(p.song_identifier), 3)
              )
          )
        ORDER BY p.id
        LIMIT ?
        "#,
    )
    .bind(limit as i64)
    .fetch_all(pool)
    .await
}

/// Set the catalog link if still unset; returns `true` if this call set it
pub async fn link_play_record(
    conn: &mut SqliteConnection,
    id: i64,
    internal_song_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE play_records SET internal_song_id = ? WHERE id = ? AND internal_song_id IS NULL",
    )
    .bind(internal_song_id)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Play records for a song identifier, in chain order
pub async fn list_by_song(
    pool: &SqlitePool,
    song_identifier: &str,
) -> Result<Vec<PlayRecord>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, internal_song_id, song_identifier, listener_address,
               gross_amount, protocol_fee, net_amount, payment_type,
               transaction_hash, log_index, block_number, recorded_at
        FROM play_records
        WHERE song_identifier = ?
        ORDER BY block_number, log_index
        "#,
    )
    .bind(song_identifier)
    .fetch_all(pool)
    .await
}
