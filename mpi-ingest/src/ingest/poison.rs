//! Poison queue
//!
//! Durable quarantine for events that failed decode or persistence, keyed
//! by `(transaction_hash, log_index)`. First failure inserts with
//! `attempts = 1`; each further failure replaces the reason and bumps
//! `attempts`; a successful retry deletes the row.

use alloy_primitives::hex;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::chain::RawLog;
use crate::db::poison::{self as store, ListOrder, PoisonRecord};
use crate::decoder::{peek_song_identifier, PaymentEvent};

/// Stored reasons are cut to this many characters
const MAX_REASON_CHARS: usize = 1024;

/// Identity and denormalized context of a failing event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantineEntry {
    pub transaction_hash: String,
    pub log_index: i64,
    pub song_identifier: Option<String>,
    pub block_number: Option<i64>,
}

impl QuarantineEntry {
    pub fn from_event(event: &PaymentEvent) -> Self {
        Self {
            transaction_hash: hex::encode_prefixed(event.transaction_hash),
            log_index: event.log_index as i64,
            song_identifier: Some(event.song_identifier_hex()),
            block_number: Some(event.block_number as i64),
        }
    }

    pub fn from_log(log: &RawLog) -> Self {
        Self {
            transaction_hash: hex::encode_prefixed(log.transaction_hash),
            log_index: log.log_index.min(i64::MAX as u64) as i64,
            song_identifier: peek_song_identifier(log).map(hex::encode_prefixed),
            block_number: i64::try_from(log.block_number).ok(),
        }
    }

    pub fn from_record(record: &PoisonRecord) -> Self {
        Self {
            transaction_hash: record.transaction_hash.clone(),
            log_index: record.log_index,
            song_identifier: record.song_identifier.clone(),
            block_number: record.block_number,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoisonQueue {
    pool: SqlitePool,
}

impl PoisonQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn quarantine(&self, entry: &QuarantineEntry, reason: &str) -> Result<(), sqlx::Error> {
        store::upsert_poison_record(
            &self.pool,
            &entry.transaction_hash,
            entry.log_index,
            entry.song_identifier.as_deref(),
            truncate_reason(reason),
            entry.block_number,
            Utc::now(),
        )
        .await
    }

    pub async fn list(&self, limit: u32, order: ListOrder) -> Result<Vec<PoisonRecord>, sqlx::Error> {
        store::list_poison_records(&self.pool, limit, order).await
    }

    pub async fn get(
        &self,
        transaction_hash: &str,
        log_index: i64,
    ) -> Result<Option<PoisonRecord>, sqlx::Error> {
        store::get_poison_record(&self.pool, transaction_hash, log_index).await
    }

    /// Remove after a successful retry
    pub async fn remove(&self, transaction_hash: &str, log_index: i64) -> Result<bool, sqlx::Error> {
        store::delete_poison_record(&self.pool, transaction_hash, log_index).await
    }
}

fn truncate_reason(reason: &str) -> &str {
    match reason.char_indices().nth(MAX_REASON_CHARS) {
        Some((idx, _)) => &reason[..idx],
        None => reason,
    }
}
