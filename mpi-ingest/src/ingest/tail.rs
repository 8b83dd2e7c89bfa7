//! Live tailer
//!
//! Background task following the chain head. Each poll processes
//! `(checkpoint, head - confirmations]` through the [`ReplayController`] in
//! pages and persists the checkpoint after every completed page, so a
//! restart resumes where the last page ended. A page with an event that
//! reached neither the store nor the poison queue is not checkpointed; the
//! next poll processes it again. Overlap with a manual replay is harmless:
//! the store absorbs duplicates.

use mpi_common::config::TailConfig;
use mpi_common::IngestConfig;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{IngestError, ReplayController};
use crate::chain::LogSource;
use crate::db::checkpoint;

/// Checkpoint row used by the tailer
pub const CHECKPOINT_NAME: &str = "payments";

pub struct Tailer {
    source: Arc<dyn LogSource>,
    replay: Arc<ReplayController>,
    pool: SqlitePool,
    config: TailConfig,
    confirmations: u64,
    page_blocks: u64,
}

impl Tailer {
    pub fn new(
        source: Arc<dyn LogSource>,
        replay: Arc<ReplayController>,
        pool: SqlitePool,
        config: &IngestConfig,
    ) -> Self {
        let settings = replay.settings();
        let page_blocks = settings.log_page_blocks.min(settings.max_replay_blocks).max(1);

        Self {
            source,
            replay,
            pool,
            config: config.tail.clone(),
            confirmations: config.chain.confirmations,
            page_blocks,
        }
    }

    /// Poll until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            start_block = self.config.start_block,
            confirmations = self.confirmations,
            poll_interval_secs = self.config.poll_interval_secs,
            "Live tailer started"
        );

        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));

        loop {
            if let Err(e) = self.poll_once(&cancel).await {
                error!(error = %e, "Tailer poll failed, retrying next interval");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("Live tailer stopped");
    }

    /// Process every confirmed block past the checkpoint
    ///
    /// Returns the checkpoint after this poll, `None` if nothing was ever
    /// processed.
    pub async fn poll_once(&self, cancel: &CancellationToken) -> Result<Option<u64>, IngestError> {
        let head = self.source.block_number().await?;
        let mut last = checkpoint::load_checkpoint(&self.pool, CHECKPOINT_NAME).await?;

        let Some(safe_head) = head.checked_sub(self.confirmations) else {
            return Ok(last);
        };

        let mut next = match last {
            Some(block) => block + 1,
            None => self.config.start_block,
        };

        if next > safe_head {
            debug!(head, safe_head, next, "Tailer up to date");
            return Ok(last);
        }

        while next <= safe_head {
            let end = next.saturating_add(self.page_blocks - 1).min(safe_head);

            let summary = self.replay.replay(next as i64, end as i64, cancel).await?;
            if summary.cancelled {
                break;
            }
            if summary.unrecorded > 0 {
                warn!(
                    from_block = next,
                    to_block = end,
                    unrecorded = summary.unrecorded,
                    "Events could not be stored or quarantined, checkpoint held"
                );
                break;
            }

            checkpoint::save_checkpoint(&self.pool, CHECKPOINT_NAME, end).await?;
            last = Some(end);

            debug!(
                from_block = next,
                to_block = end,
                scanned = summary.scanned,
                successful = summary.successful,
                "Tailer page complete"
            );
            next = end + 1;
        }

        Ok(last)
    }
}
