//! Chain log source
//!
//! The ingestion pipeline never talks to a node directly; it is handed a
//! [`LogSource`] at construction. Production uses the JSON-RPC client in
//! [`rpc`], tests use scripted in-memory sources.

pub mod rpc;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use rpc::JsonRpcLogSource;

/// A log as emitted by a contract execution
///
/// `transaction_hash` and `log_index` are mandatory: logs from pending
/// blocks carry neither and are rejected by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub transaction_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
}

/// Transaction receipt, reduced to what retry needs
#[derive(Debug, Clone)]
pub struct Receipt {
    pub transaction_hash: B256,
    pub block_number: Option<u64>,
    pub logs: Vec<RawLog>,
}

impl Receipt {
    /// Find the log with the given index
    pub fn log_at(&self, log_index: u64) -> Option<&RawLog> {
        self.logs.iter().find(|log| log.log_index == log_index)
    }
}

/// Log source errors
#[derive(Debug, Error)]
pub enum LogSourceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl LogSourceError {
    /// Node could not be reached at all (as opposed to answering badly)
    pub fn is_unreachable(&self) -> bool {
        matches!(self, LogSourceError::Transport(_) | LogSourceError::Timeout(_))
    }
}

/// Read access to contract logs and receipts
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Logs emitted by `address` with first topic `topic0` in `[from_block, to_block]`
    async fn get_logs(
        &self,
        address: Address,
        topic0: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, LogSourceError>;

    /// Receipt for a transaction, `None` if the node does not know it
    async fn get_transaction_receipt(
        &self,
        tx_hash: B256,
    ) -> Result<Option<Receipt>, LogSourceError>;

    /// Current head block number
    async fn block_number(&self) -> Result<u64, LogSourceError>;
}
