//! Retry Processor
//!
//! Re-drives quarantined events. Only the transaction hash and log index
//! are retained, so each retry re-fetches the original receipt, picks the
//! log at the recorded index and runs it through decode and upsert again.
//!
//! ```text
//! Quarantined -> RetryAttempted -> Persisted    (poison record removed)
//!                               -> Quarantined  (reason replaced, attempts + 1)
//! ```

use alloy_primitives::B256;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{EventOutcome, IngestError, IngestPipeline, QuarantineEntry};
use crate::chain::LogSource;
use crate::db::poison::{ListOrder, PoisonRecord};
use crate::decoder::PaymentEvent;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySummary {
    /// Records that succeeded and were removed from the queue
    pub retried: u64,
    #[serde(skip)]
    pub attempted: u64,
}

pub struct RetryProcessor {
    source: Arc<dyn LogSource>,
    pipeline: Arc<IngestPipeline>,
    max_batch: u32,
}

impl RetryProcessor {
    pub fn new(source: Arc<dyn LogSource>, pipeline: Arc<IngestPipeline>, max_batch: u32) -> Self {
        Self {
            source,
            pipeline,
            max_batch,
        }
    }

    /// Retry up to `limit` of the oldest poison records
    ///
    /// The selected batch is applied sequentially in chain order. Residual
    /// failures stay quarantined. An unreachable Log Source aborts the batch
    /// without touching the remaining records.
    pub async fn retry_batch(
        &self,
        limit: u32,
        cancel: &CancellationToken,
    ) -> Result<RetrySummary, IngestError> {
        if limit == 0 || limit > self.max_batch {
            return Err(IngestError::InvalidRequest(format!(
                "retry limit must be within 1..={}",
                self.max_batch
            )));
        }

        let mut records = self.pipeline.poison().list(limit, ListOrder::OldestFirst).await?;
        records.sort_by_key(|r| (r.block_number.unwrap_or(i64::MAX), r.log_index));

        let mut summary = RetrySummary::default();

        for record in &records {
            if cancel.is_cancelled() {
                warn!(attempted = summary.attempted, "Retry batch cancelled");
                break;
            }
            summary.attempted += 1;

            let entry = QuarantineEntry::from_record(record);
            let event = match self.refetch(record).await {
                Ok(event) => event,
                Err(IngestError::LogSource(e)) if e.is_unreachable() => {
                    warn!(
                        attempted = summary.attempted,
                        retried = summary.retried,
                        error = %e,
                        "Log source unreachable, aborting retry batch"
                    );
                    return Err(IngestError::LogSource(e));
                }
                Err(err) => {
                    self.pipeline.handle_failure(entry, err).await;
                    continue;
                }
            };

            let outcome = self.pipeline.apply_event(&event).await;
            if outcome.is_success() {
                self.pipeline
                    .poison()
                    .remove(&entry.transaction_hash, entry.log_index)
                    .await?;
                debug!(key = %event.key(), "Retry succeeded, poison record removed");
                summary.retried += 1;
            } else if let EventOutcome::Quarantined { reason } = outcome {
                debug!(key = %event.key(), reason = %reason, "Retry failed, still quarantined");
            }
        }

        info!(
            attempted = summary.attempted,
            retried = summary.retried,
            "Retry batch complete"
        );

        Ok(summary)
    }

    async fn refetch(&self, record: &PoisonRecord) -> Result<PaymentEvent, IngestError> {
        let tx_hash = B256::from_str(&record.transaction_hash).map_err(|e| {
            IngestError::InvariantViolation(format!(
                "poison record has unparsable transaction hash '{}': {}",
                record.transaction_hash, e
            ))
        })?;

        let log_index = u64::try_from(record.log_index).map_err(|_| {
            IngestError::InvariantViolation(format!(
                "poison record has negative log index {}",
                record.log_index
            ))
        })?;

        let receipt = self
            .source
            .get_transaction_receipt(tx_hash)
            .await?
            .ok_or_else(|| {
                IngestError::LogUnavailable(format!(
                    "receipt for {} not found",
                    record.transaction_hash
                ))
            })?;

        let log = receipt.log_at(log_index).ok_or_else(|| {
            IngestError::LogUnavailable(format!(
                "receipt for {} has no log at index {}",
                record.transaction_hash, log_index
            ))
        })?;

        Ok(self.pipeline.decoder().decode(log)?)
    }
}
