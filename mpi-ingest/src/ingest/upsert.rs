//! Idempotent Upsert Engine
//!
//! Persists each [`PaymentEvent`] at most once and updates the owning song's
//! aggregate in the same transaction:
//!
//! 1. resolve the song identifier (read-only catalog lookup)
//! 2. insert the PlayRecord, absorbing only the `(tx, logIndex)` conflict
//! 3. if a new row was written and the song resolved, bump the aggregate
//!
//! The transaction takes SQLite's write lock up front, so concurrent song
//! partitions wait on the busy timeout instead of failing a read-to-write
//! upgrade. Any error rolls the whole transaction back (the `Transaction`
//! is dropped without commit).

use alloy_primitives::hex;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::IngestError;
use crate::db::{self, catalog, plays};
use crate::decoder::PaymentEvent;

/// Idle lock entries are pruned once the map grows past this
const LOCK_PRUNE_THRESHOLD: usize = 1024;

/// Result of one upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted { internal_song_id: Option<String> },
    Duplicate,
}

/// Per-song async locks
///
/// Held for the duration of a song's transaction so increments from the
/// tailer, a manual replay and a retry batch never interleave on one song.
#[derive(Debug, Clone, Default)]
pub struct SongLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl SongLocks {
    pub async fn lock(&self, song_identifier: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if map.len() > LOCK_PRUNE_THRESHOLD {
                map.retain(|_, m| Arc::strong_count(m) > 1);
            }
            map.entry(song_identifier.to_string()).or_default().clone()
        };
        mutex.lock_owned().await
    }
}

#[derive(Debug, Clone)]
pub struct UpsertEngine {
    pool: SqlitePool,
    locks: SongLocks,
}

impl UpsertEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: SongLocks::default(),
        }
    }

    pub async fn apply(&self, event: &PaymentEvent) -> Result<UpsertOutcome, IngestError> {
        let song_identifier = event.song_identifier_hex();
        let _song_guard = self.locks.lock(&song_identifier).await;

        let mut tx = db::begin_write(&self.pool).await?;

        let internal_song_id =
            catalog::resolve_song_identifier(&mut *tx, &song_identifier).await?;

        let inserted =
            plays::insert_play_record(&mut *tx, event, internal_song_id.as_deref(), Utc::now())
                .await?;

        if !inserted {
            // The conflict path must leave an existing row behind
            let tx_hash = hex::encode_prefixed(event.transaction_hash);
            if !plays::play_record_exists(&mut *tx, &tx_hash, event.log_index as i64).await? {
                return Err(IngestError::InvariantViolation(format!(
                    "insert for {} was a no-op but no play record exists",
                    event.key()
                )));
            }
            tx.commit().await?;
            return Ok(UpsertOutcome::Duplicate);
        }

        if let Some(guid) = internal_song_id.as_deref() {
            catalog::increment_aggregate(&mut *tx, guid, &event.net_amount).await?;
        }

        tx.commit().await?;

        Ok(UpsertOutcome::Inserted { internal_song_id })
    }

    /// Link play records whose song the catalog did not know at ingest time
    ///
    /// Each newly linked record increments its song aggregate in the same
    /// transaction as the link. Returns the number of records linked.
    pub async fn relink_unlinked(&self, limit: u32) -> Result<u64, IngestError> {
        let candidates = plays::fetch_linkable(&self.pool, limit).await?;
        let mut linked = 0u64;

        for play in candidates {
            let net_amount = Decimal::from_str(&play.net_amount).map_err(|e| {
                IngestError::InvariantViolation(format!(
                    "play record {} has unparsable net amount: {}",
                    play.id, e
                ))
            })?;

            let _song_guard = self.locks.lock(&play.song_identifier).await;
            let mut tx = db::begin_write(&self.pool).await?;

            let Some(guid) =
                catalog::resolve_song_identifier(&mut *tx, &play.song_identifier).await?
            else {
                continue;
            };

            if !plays::link_play_record(&mut *tx, play.id, &guid).await? {
                warn!(play_id = play.id, "Play record linked concurrently, skipping");
                continue;
            }

            catalog::increment_aggregate(&mut *tx, &guid, &net_amount).await?;
            tx.commit().await?;

            debug!(play_id = play.id, song = %guid, "Linked play record to catalog song");
            linked += 1;
        }

        Ok(linked)
    }
}
