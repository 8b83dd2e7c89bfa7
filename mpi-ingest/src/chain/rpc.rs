//! Ethereum JSON-RPC log source
//!
//! Implements `eth_getLogs`, `eth_getTransactionReceipt` and
//! `eth_blockNumber` over HTTP with a per-request timeout.

use alloy_primitives::{Address, Bytes, B256, U64};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{LogSource, LogSourceError, RawLog, Receipt};

const USER_AGENT: &str = concat!("mpi-ingest/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Log object as returned by the node
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    transaction_hash: Option<B256>,
    log_index: Option<U64>,
    block_number: Option<U64>,
    #[serde(default)]
    removed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    block_number: Option<U64>,
    logs: Vec<RpcLog>,
}

impl RpcLog {
    /// Convert to a keyed log; `None` for logs removed by a reorg
    fn into_raw(self) -> Result<Option<RawLog>, LogSourceError> {
        if self.removed {
            return Ok(None);
        }

        let transaction_hash = self
            .transaction_hash
            .ok_or_else(|| LogSourceError::Malformed("log without transactionHash".into()))?;
        let log_index = self
            .log_index
            .ok_or_else(|| LogSourceError::Malformed("log without logIndex".into()))?;
        let block_number = self
            .block_number
            .ok_or_else(|| LogSourceError::Malformed("log without blockNumber".into()))?;

        Ok(Some(RawLog {
            address: self.address,
            topics: self.topics,
            data: self.data,
            transaction_hash,
            log_index: log_index.to::<u64>(),
            block_number: block_number.to::<u64>(),
        }))
    }
}

/// HTTP JSON-RPC client
pub struct JsonRpcLogSource {
    http_client: reqwest::Client,
    url: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl JsonRpcLogSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, LogSourceError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| LogSourceError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            url: url.into(),
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, LogSourceError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        tracing::debug!(method = %method, url = %self.url, "JSON-RPC request");

        let response = self
            .http_client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LogSourceError::Transport(format!("HTTP {}: {}", status, text)));
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| LogSourceError::Malformed(e.to_string()))?;

        if let Some(err) = body.error {
            return Err(LogSourceError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        Ok(body.result)
    }

    fn map_reqwest_error(&self, e: reqwest::Error) -> LogSourceError {
        if e.is_timeout() {
            LogSourceError::Timeout(self.timeout)
        } else {
            LogSourceError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl LogSource for JsonRpcLogSource {
    async fn get_logs(
        &self,
        address: Address,
        topic0: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, LogSourceError> {
        let params = json!([{
            "address": address,
            "topics": [topic0],
            "fromBlock": U64::from(from_block),
            "toBlock": U64::from(to_block),
        }]);

        let logs: Vec<RpcLog> = self
            .call("eth_getLogs", params)
            .await?
            .ok_or_else(|| LogSourceError::Malformed("eth_getLogs returned null".into()))?;

        let mut out = Vec::with_capacity(logs.len());
        for log in logs {
            if let Some(raw) = log.into_raw()? {
                out.push(raw);
            }
        }
        Ok(out)
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: B256,
    ) -> Result<Option<Receipt>, LogSourceError> {
        let receipt: Option<RpcReceipt> = self
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;

        let Some(receipt) = receipt else {
            return Ok(None);
        };

        let mut logs = Vec::with_capacity(receipt.logs.len());
        for log in receipt.logs {
            if let Some(raw) = log.into_raw()? {
                logs.push(raw);
            }
        }

        Ok(Some(Receipt {
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|b| b.to::<u64>()),
            logs,
        }))
    }

    async fn block_number(&self) -> Result<u64, LogSourceError> {
        let head: U64 = self
            .call("eth_blockNumber", json!([]))
            .await?
            .ok_or_else(|| LogSourceError::Malformed("eth_blockNumber returned null".into()))?;
        Ok(head.to::<u64>())
    }
}
