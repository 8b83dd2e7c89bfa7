//! Catalog lookups and song aggregate updates
//!
//! The catalog owns the `songs` table. From here we only resolve opaque
//! song identifiers (read-only, never creating rows) and bump aggregates
//! inside the caller's transaction.

use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use std::str::FromStr;

use crate::ingest::IngestError;

/// Resolve an opaque `0x`-prefixed song identifier to the catalog guid
///
/// The catalog may store the hash with or without the `0x` prefix and in
/// any case.
pub async fn resolve_song_identifier(
    conn: &mut SqliteConnection,
    song_identifier: &str,
) -> Result<Option<String>, sqlx::Error> {
    let prefixed = song_identifier.to_ascii_lowercase();
    let bare = prefixed.strip_prefix("0x").unwrap_or(&prefixed).to_string();

    let guid: Option<(String,)> = sqlx::query_as(
        "SELECT guid FROM songs WHERE lower(song_hash) IN (?, ?) ORDER BY guid LIMIT 1",
    )
    .bind(&prefixed)
    .bind(&bare)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(guid.map(|(g,)| g))
}

/// Add one play and `net_amount` earnings to a song
///
/// Must run inside a transaction from [`crate::db::begin_write`], which
/// holds SQLite's write lock, so this read-modify-write cannot interleave
/// with another writer.
pub async fn increment_aggregate(
    conn: &mut SqliteConnection,
    song_guid: &str,
    net_amount: &Decimal,
) -> Result<(), IngestError> {
    let current: Option<(String,)> = sqlx::query_as("SELECT earnings FROM songs WHERE guid = ?")
        .bind(song_guid)
        .fetch_optional(&mut *conn)
        .await?;

    let Some((earnings,)) = current else {
        return Err(IngestError::InvariantViolation(format!(
            "song {} resolved but missing at aggregate update",
            song_guid
        )));
    };

    let earnings = Decimal::from_str(earnings.trim()).map_err(|e| {
        IngestError::InvariantViolation(format!(
            "song {} has unparsable earnings '{}': {}",
            song_guid, earnings, e
        ))
    })?;

    let updated = earnings.checked_add(*net_amount).ok_or_else(|| {
        IngestError::InvariantViolation(format!("song {} earnings overflow", song_guid))
    })?;

    let result = sqlx::query(
        r#"
        UPDATE songs
        SET play_count = play_count + 1,
            earnings = ?,
            updated_at = CURRENT_TIMESTAMP
        WHERE guid = ?
        "#,
    )
    .bind(updated.normalize().to_string())
    .bind(song_guid)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() != 1 {
        return Err(IngestError::InvariantViolation(format!(
            "aggregate update for song {} touched {} rows",
            song_guid,
            result.rows_affected()
        )));
    }

    Ok(())
}

/// Current aggregate for a song, `None` if the catalog has no such row
pub async fn song_aggregate(
    conn: &mut SqliteConnection,
    song_guid: &str,
) -> Result<Option<(i64, Decimal)>, IngestError> {
    let row: Option<(i64, String)> =
        sqlx::query_as("SELECT play_count, earnings FROM songs WHERE guid = ?")
            .bind(song_guid)
            .fetch_optional(&mut *conn)
            .await?;

    let Some((count, earnings)) = row else {
        return Ok(None);
    };

    let earnings = Decimal::from_str(earnings.trim()).map_err(|e| {
        IngestError::InvariantViolation(format!(
            "song {} has unparsable earnings '{}': {}",
            song_guid, earnings, e
        ))
    })?;

    Ok(Some((count, earnings)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        mpi_common::db::init_schema(&pool).await.unwrap();
        sqlx::query("INSERT INTO songs (guid, song_hash, title) VALUES ('s1', '0xABCD', 'One')")
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_resolve_ignores_prefix_and_case() {
        let pool = memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let guid = resolve_song_identifier(&mut *conn, "0xabcd").await.unwrap();
        assert_eq!(guid.as_deref(), Some("s1"));
        assert!(resolve_song_identifier(&mut *conn, "0xbeef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_aggregate_increments() {
        let pool = memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        increment_aggregate(&mut *conn, "s1", &Decimal::new(25, 1)).await.unwrap();
        increment_aggregate(&mut *conn, "s1", &Decimal::new(5, 1)).await.unwrap();

        let (count, earnings) = song_aggregate(&mut *conn, "s1").await.unwrap().unwrap();
        assert_eq!(count, 2);
        assert_eq!(earnings, Decimal::new(3, 0));
        assert!(song_aggregate(&mut *conn, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unparsable_earnings_is_an_error() {
        let pool = memory_pool().await;
        sqlx::query("UPDATE songs SET earnings = 'garbage' WHERE guid = 's1'")
            .execute(&pool)
            .await
            .unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let err = song_aggregate(&mut *conn, "s1").await.unwrap_err();
        assert!(matches!(err, IngestError::InvariantViolation(_)));

        let err = increment_aggregate(&mut *conn, "s1", &Decimal::ONE).await.unwrap_err();
        assert!(matches!(err, IngestError::InvariantViolation(_)));
    }
}
