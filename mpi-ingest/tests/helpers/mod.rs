//! Shared integration test helpers
#![allow(dead_code)]

pub mod db_utils;
pub mod fake_source;

use alloy_primitives::{Address, Bytes, B256, U256};
use mpi_common::IngestConfig;
use mpi_ingest::chain::{LogSource, RawLog};
use mpi_ingest::decoder::PAYMENT_PROCESSED_TOPIC;
use mpi_ingest::ingest::IngestServices;
use sqlx::SqlitePool;
use std::sync::Arc;

pub use db_utils::*;
pub use fake_source::FakeLogSource;

pub const ONE_TOKEN: u128 = 1_000_000_000_000_000_000;

/// Fixed protocol fee carried by every generated payment
pub const FEE_WEI: u128 = ONE_TOKEN / 2;

pub fn contract() -> Address {
    Address::repeat_byte(0x11)
}

pub fn listener() -> Address {
    Address::repeat_byte(0x22)
}

pub fn song(byte: u8) -> B256 {
    B256::repeat_byte(byte)
}

/// Distinct transaction hash per `n`
pub fn tx_hash(n: u64) -> B256 {
    B256::left_padding_from(&n.to_be_bytes())
}

/// Configuration pointing at the test contract, with small log pages
pub fn test_config() -> IngestConfig {
    let mut config = IngestConfig::default();
    config.chain.contract_address = contract().to_string();
    config.chain.log_page_blocks = 25;
    config.chain.confirmations = 2;
    config.ingest.max_replay_blocks = 10_000;
    config.ingest.song_parallelism = 4;
    config.ingest.retry_batch_default = 10;
    config
}

pub fn build_services(pool: &SqlitePool, source: Arc<FakeLogSource>) -> IngestServices {
    build_services_with(pool, source, &test_config())
}

pub fn build_services_with(
    pool: &SqlitePool,
    source: Arc<FakeLogSource>,
    config: &IngestConfig,
) -> IngestServices {
    let source: Arc<dyn LogSource> = source;
    IngestServices::from_config(pool.clone(), source, config)
        .expect("Failed to construct services")
}

fn encode_data(net_wei: u128, fee_wei: u128, payment_type: u8) -> Bytes {
    let mut data = Vec::with_capacity(128);
    data.extend_from_slice(&U256::from(net_wei + fee_wei).to_be_bytes::<32>());
    data.extend_from_slice(&U256::from(fee_wei).to_be_bytes::<32>());
    data.extend_from_slice(&U256::from(net_wei).to_be_bytes::<32>());
    data.extend_from_slice(&U256::from(payment_type).to_be_bytes::<32>());
    Bytes::from(data)
}

/// Well-formed stream payment of `net_wei` to `song_id`
pub fn payment_log(tx: B256, log_index: u64, block: u64, song_id: B256, net_wei: u128) -> RawLog {
    RawLog {
        address: contract(),
        topics: vec![*PAYMENT_PROCESSED_TOPIC, song_id, listener().into_word()],
        data: encode_data(net_wei, FEE_WEI, 0),
        transaction_hash: tx,
        log_index,
        block_number: block,
    }
}

/// Payment log carrying an unknown payment type code
pub fn unknown_type_log(tx: B256, log_index: u64, block: u64, song_id: B256) -> RawLog {
    let mut log = payment_log(tx, log_index, block, song_id, ONE_TOKEN);
    log.data = encode_data(ONE_TOKEN, FEE_WEI, 9);
    log
}

/// One payment per block in `[from, to]`, all for `song_id`
pub fn payments_per_block(from: u64, to: u64, song_id: B256) -> Vec<RawLog> {
    (from..=to)
        .map(|block| payment_log(tx_hash(block), 0, block, song_id, ONE_TOKEN))
        .collect()
}
