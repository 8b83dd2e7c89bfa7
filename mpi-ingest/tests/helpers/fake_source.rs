//! Scripted in-memory Log Source

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use mpi_ingest::chain::{LogSource, LogSourceError, RawLog, Receipt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Serves `get_logs` and receipts from a fixed set of logs
///
/// Receipts are assembled from the scripted logs sharing a transaction
/// hash. Individual receipts can be pruned and the whole source can be
/// made unreachable.
#[derive(Default)]
pub struct FakeLogSource {
    logs: Mutex<Vec<RawLog>>,
    pruned: Mutex<HashSet<B256>>,
    unreachable: AtomicBool,
    head: AtomicU64,
    get_logs_calls: AtomicUsize,
    receipt_calls: AtomicUsize,
}

impl FakeLogSource {
    pub fn new(logs: Vec<RawLog>) -> Self {
        let head = logs.iter().map(|l| l.block_number).max().unwrap_or(0);
        Self {
            logs: Mutex::new(logs),
            head: AtomicU64::new(head),
            ..Default::default()
        }
    }

    /// Add a log, or replace the one with the same key
    pub fn upsert_log(&self, log: RawLog) {
        let mut logs = self.logs.lock().unwrap();
        logs.retain(|l| {
            !(l.transaction_hash == log.transaction_hash && l.log_index == log.log_index)
        });
        logs.push(log);
    }

    pub fn prune_receipt(&self, tx: B256) {
        self.pruned.lock().unwrap().insert(tx);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn get_logs_calls(&self) -> usize {
        self.get_logs_calls.load(Ordering::SeqCst)
    }

    pub fn receipt_calls(&self) -> usize {
        self.receipt_calls.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<(), LogSourceError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LogSourceError::Transport("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LogSource for FakeLogSource {
    async fn get_logs(
        &self,
        address: Address,
        topic0: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, LogSourceError> {
        self.get_logs_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;

        let logs = self.logs.lock().unwrap();
        Ok(logs
            .iter()
            .filter(|l| l.address == address)
            .filter(|l| l.topics.first() == Some(&topic0))
            .filter(|l| l.block_number >= from_block && l.block_number <= to_block)
            .cloned()
            .collect())
    }

    async fn get_transaction_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, LogSourceError> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;

        if self.pruned.lock().unwrap().contains(&tx_hash) {
            return Ok(None);
        }

        let logs: Vec<RawLog> = self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.transaction_hash == tx_hash)
            .cloned()
            .collect();

        if logs.is_empty() {
            return Ok(None);
        }

        Ok(Some(Receipt {
            transaction_hash: tx_hash,
            block_number: logs.first().map(|l| l.block_number),
            logs,
        }))
    }

    async fn block_number(&self) -> Result<u64, LogSourceError> {
        self.check_reachable()?;
        Ok(self.head.load(Ordering::SeqCst))
    }
}
