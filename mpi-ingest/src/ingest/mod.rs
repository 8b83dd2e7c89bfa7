//! Event ingestion pipeline
//!
//! `RawLog -> decode -> UpsertEngine -> {PlayRecord | PoisonQueue}`
//!
//! Every event ends in an explicit [`EventOutcome`]; batch drivers
//! ([`ReplayController`], [`RetryProcessor`], [`Tailer`]) fold outcomes into
//! summaries instead of unwinding on per-event failures.

pub mod poison;
pub mod replay;
pub mod retry;
pub mod tail;
pub mod upsert;

use alloy_primitives::Address;
use mpi_common::IngestConfig;
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::chain::{LogSource, LogSourceError, RawLog};
use crate::decoder::{DecodeError, PaymentEvent, PaymentLogDecoder};

pub use poison::{PoisonQueue, QuarantineEntry};
pub use replay::{ReplayController, ReplaySettings, ReplaySummary};
pub use retry::{RetryProcessor, RetrySummary};
pub use tail::Tailer;
pub use upsert::{SongLocks, UpsertEngine, UpsertOutcome};

/// Ingestion error taxonomy
#[derive(Debug, Error)]
pub enum IngestError {
    /// Malformed or unsupported log; quarantined
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// Connection, timeout, lock or constraint failure; quarantined for retry
    #[error("storage error: {0}")]
    TransientStorage(#[from] sqlx::Error),

    /// Logic defect; surfaced to operators, never quarantined
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Replay range rejected before any work starts
    #[error("invalid block range: {0}")]
    InvalidBlockRange(String),

    /// Malformed limit or parameter
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Log source failed; batch-level when the node is unreachable
    #[error("log source error: {0}")]
    LogSource(#[from] LogSourceError),

    /// Original log could not be located for a retry (pruned node, reorg)
    #[error("log unavailable: {0}")]
    LogUnavailable(String),
}

impl IngestError {
    /// Data-level failures that belong in the poison queue
    pub fn is_quarantinable(&self) -> bool {
        match self {
            IngestError::Decode(_)
            | IngestError::TransientStorage(_)
            | IngestError::LogUnavailable(_) => true,
            IngestError::LogSource(e) => !e.is_unreachable(),
            _ => false,
        }
    }
}

/// Terminal state of one event in one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// New PlayRecord written
    Persisted,
    /// Key already ingested; nothing changed
    Duplicate,
    /// Failure recorded in the poison queue
    Quarantined { reason: String },
    /// Failure that could not even be quarantined
    QuarantineFailed { reason: String },
    /// Invariant violation, reported to operators
    Violation { detail: String },
}

impl EventOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, EventOutcome::Persisted | EventOutcome::Duplicate)
    }

    /// The event is in neither the store nor the poison queue
    pub fn is_unrecorded(&self) -> bool {
        matches!(self, EventOutcome::QuarantineFailed { .. })
    }
}

/// Last operator-relevant error, exposed by the health endpoint
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    last_error: Arc<RwLock<Option<String>>>,
}

impl Diagnostics {
    pub async fn record(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }
}

/// Decoder + Upsert Engine + Poison Queue wired together
pub struct IngestPipeline {
    decoder: PaymentLogDecoder,
    engine: UpsertEngine,
    poison: PoisonQueue,
    diagnostics: Diagnostics,
}

impl IngestPipeline {
    pub fn new(
        decoder: PaymentLogDecoder,
        engine: UpsertEngine,
        poison: PoisonQueue,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            decoder,
            engine,
            poison,
            diagnostics,
        }
    }

    pub fn decoder(&self) -> &PaymentLogDecoder {
        &self.decoder
    }

    pub fn poison(&self) -> &PoisonQueue {
        &self.poison
    }

    /// Decode a log; failures are quarantined and returned as the outcome
    pub async fn decode_or_quarantine(&self, log: &RawLog) -> Result<PaymentEvent, EventOutcome> {
        match self.decoder.decode(log) {
            Ok(event) => Ok(event),
            Err(e) => Err(self
                .handle_failure(QuarantineEntry::from_log(log), IngestError::Decode(e))
                .await),
        }
    }

    /// Full pass for one log
    pub async fn process_log(&self, log: &RawLog) -> EventOutcome {
        match self.decode_or_quarantine(log).await {
            Ok(event) => self.apply_event(&event).await,
            Err(outcome) => outcome,
        }
    }

    /// Persist a decoded event
    pub async fn apply_event(&self, event: &PaymentEvent) -> EventOutcome {
        match self.engine.apply(event).await {
            Ok(UpsertOutcome::Inserted { internal_song_id }) => {
                debug!(
                    key = %event.key(),
                    block = event.block_number,
                    linked = internal_song_id.is_some(),
                    "Persisted play record"
                );
                EventOutcome::Persisted
            }
            Ok(UpsertOutcome::Duplicate) => {
                debug!(key = %event.key(), "Play record already ingested");
                EventOutcome::Duplicate
            }
            Err(err) => self.handle_failure(QuarantineEntry::from_event(event), err).await,
        }
    }

    /// Route a failure to the poison queue or to operators
    pub async fn handle_failure(&self, entry: QuarantineEntry, err: IngestError) -> EventOutcome {
        if !err.is_quarantinable() {
            let detail = err.to_string();
            error!(
                tx_hash = %entry.transaction_hash,
                log_index = entry.log_index,
                error = %detail,
                "Event not quarantined: operator attention required"
            );
            self.diagnostics
                .record(format!("{}#{}: {}", entry.transaction_hash, entry.log_index, detail))
                .await;
            return EventOutcome::Violation { detail };
        }

        let reason = err.to_string();
        match self.poison.quarantine(&entry, &reason).await {
            Ok(()) => {
                warn!(
                    tx_hash = %entry.transaction_hash,
                    log_index = entry.log_index,
                    reason = %reason,
                    "Event quarantined"
                );
                EventOutcome::Quarantined { reason }
            }
            Err(qerr) => {
                error!(
                    tx_hash = %entry.transaction_hash,
                    log_index = entry.log_index,
                    reason = %reason,
                    error = %qerr,
                    "Failed to quarantine event"
                );
                self.diagnostics
                    .record(format!(
                        "{}#{}: quarantine failed: {}",
                        entry.transaction_hash, entry.log_index, qerr
                    ))
                    .await;
                EventOutcome::QuarantineFailed { reason }
            }
        }
    }
}

/// Every component, constructed with explicitly injected handles
#[derive(Clone)]
pub struct IngestServices {
    pub pipeline: Arc<IngestPipeline>,
    pub engine: UpsertEngine,
    pub poison: PoisonQueue,
    pub replay: Arc<ReplayController>,
    pub retry: Arc<RetryProcessor>,
    pub diagnostics: Diagnostics,
}

impl IngestServices {
    pub fn from_config(
        pool: SqlitePool,
        source: Arc<dyn LogSource>,
        config: &IngestConfig,
    ) -> mpi_common::Result<Self> {
        let contract = Address::from_str(&config.chain.contract_address).map_err(|e| {
            mpi_common::Error::Config(format!("Invalid contract address: {}", e))
        })?;

        let decoder = PaymentLogDecoder::new(contract, config.ingest.token_decimals);
        let engine = UpsertEngine::new(pool.clone());
        let poison = PoisonQueue::new(pool);
        let diagnostics = Diagnostics::default();

        let pipeline = Arc::new(IngestPipeline::new(
            decoder,
            engine.clone(),
            poison.clone(),
            diagnostics.clone(),
        ));

        let replay = Arc::new(ReplayController::new(
            source.clone(),
            pipeline.clone(),
            ReplaySettings::from_config(config),
        ));
        let retry = Arc::new(RetryProcessor::new(
            source,
            pipeline.clone(),
            config.ingest.retry_batch_max,
        ));

        Ok(Self {
            pipeline,
            engine,
            poison,
            replay,
            retry,
            diagnostics,
        })
    }
}
