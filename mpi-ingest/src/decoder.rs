//! Payment log decoder
//!
//! Turns a raw `PaymentProcessed` log into a typed [`PaymentEvent`].
//! Pure and deterministic: no I/O, no clock.
//!
//! Event ABI:
//!
//! ```text
//! PaymentProcessed(
//!     bytes32 indexed songId,
//!     address indexed listener,
//!     uint256 grossAmount,
//!     uint256 protocolFee,
//!     uint256 netAmount,
//!     uint8   paymentType
//! )
//! ```

use alloy_primitives::{hex, keccak256, Address, B256, U256};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::chain::RawLog;

/// Canonical event signature
pub const PAYMENT_PROCESSED_SIGNATURE: &str =
    "PaymentProcessed(bytes32,address,uint256,uint256,uint256,uint8)";

/// keccak256 of [`PAYMENT_PROCESSED_SIGNATURE`], the log's topic0
pub static PAYMENT_PROCESSED_TOPIC: Lazy<B256> =
    Lazy::new(|| keccak256(PAYMENT_PROCESSED_SIGNATURE.as_bytes()));

const WORD: usize = 32;
const DATA_WORDS: usize = 4;

/// Decimal mantissa is 96 bits; larger smallest-unit amounts cannot be represented
const MAX_AMOUNT_BITS: usize = 96;

/// Decode failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("log emitted by {actual}, expected {expected}")]
    WrongEmitter { expected: Address, actual: Address },

    #[error("log has no topics")]
    NoTopics,

    #[error("unexpected event signature {0}")]
    WrongSignature(B256),

    #[error("expected 3 topics, found {0}")]
    TopicCount(usize),

    #[error("listener topic is not a left-padded address")]
    MalformedListener,

    #[error("expected {expected} data bytes, found {actual}")]
    DataLength { expected: usize, actual: usize },

    #[error("{field} does not fit the amount representation")]
    AmountOutOfRange { field: &'static str },

    #[error("payment type word is not a uint8")]
    MalformedPaymentType,

    #[error("unknown payment type code {0}")]
    UnknownPaymentType(u8),

    #[error("gross amount {gross} != protocol fee {fee} + net amount {net}")]
    InconsistentAmounts { gross: U256, fee: U256, net: U256 },

    #[error("{field} {value} exceeds the storable range")]
    PositionOutOfRange { field: &'static str, value: u64 },
}

/// Closed set of payment categories
///
/// Unknown codes fail decoding instead of defaulting to a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Stream,
    Download,
    Tip,
    Patronage,
    NftAccess,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Stream => "stream",
            PaymentType::Download => "download",
            PaymentType::Tip => "tip",
            PaymentType::Patronage => "patronage",
            PaymentType::NftAccess => "nft_access",
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            PaymentType::Stream => 0,
            PaymentType::Download => 1,
            PaymentType::Tip => 2,
            PaymentType::Patronage => 3,
            PaymentType::NftAccess => 4,
        }
    }
}

impl TryFrom<u8> for PaymentType {
    type Error = DecodeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(PaymentType::Stream),
            1 => Ok(PaymentType::Download),
            2 => Ok(PaymentType::Tip),
            3 => Ok(PaymentType::Patronage),
            4 => Ok(PaymentType::NftAccess),
            other => Err(DecodeError::UnknownPaymentType(other)),
        }
    }
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Idempotency key of one real-world event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub transaction_hash: B256,
    pub log_index: u64,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", hex::encode_prefixed(self.transaction_hash), self.log_index)
    }
}

/// Decoded payment event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    pub song_identifier: B256,
    pub listener: Address,
    pub gross_amount: Decimal,
    pub protocol_fee: Decimal,
    pub net_amount: Decimal,
    pub payment_type: PaymentType,
    pub transaction_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
}

impl PaymentEvent {
    pub fn key(&self) -> EventKey {
        EventKey {
            transaction_hash: self.transaction_hash,
            log_index: self.log_index,
        }
    }

    /// Lowercase `0x`-prefixed song identifier as stored
    pub fn song_identifier_hex(&self) -> String {
        hex::encode_prefixed(self.song_identifier)
    }
}

/// Decoder bound to one payment router contract
#[derive(Debug, Clone)]
pub struct PaymentLogDecoder {
    contract: Address,
    decimals: u32,
}

impl PaymentLogDecoder {
    /// `decimals` is the token's smallest-unit exponent (at most 28)
    pub fn new(contract: Address, decimals: u32) -> Self {
        Self {
            contract,
            decimals: decimals.min(28),
        }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn topic0(&self) -> B256 {
        *PAYMENT_PROCESSED_TOPIC
    }

    pub fn decode(&self, log: &RawLog) -> Result<PaymentEvent, DecodeError> {
        if log.address != self.contract {
            return Err(DecodeError::WrongEmitter {
                expected: self.contract,
                actual: log.address,
            });
        }

        let signature = log.topics.first().ok_or(DecodeError::NoTopics)?;
        if *signature != *PAYMENT_PROCESSED_TOPIC {
            return Err(DecodeError::WrongSignature(*signature));
        }
        if log.topics.len() != 3 {
            return Err(DecodeError::TopicCount(log.topics.len()));
        }

        let song_identifier = log.topics[1];
        let listener = topic_to_address(&log.topics[2])?;

        let data = log.data.as_ref();
        if data.len() != DATA_WORDS * WORD {
            return Err(DecodeError::DataLength {
                expected: DATA_WORDS * WORD,
                actual: data.len(),
            });
        }

        let gross = word(data, 0);
        let fee = word(data, 1);
        let net = word(data, 2);
        let payment_type = decode_payment_type(word(data, 3))?;

        if fee.checked_add(net) != Some(gross) {
            return Err(DecodeError::InconsistentAmounts { gross, fee, net });
        }

        check_position("block_number", log.block_number)?;
        check_position("log_index", log.log_index)?;

        Ok(PaymentEvent {
            song_identifier,
            listener,
            gross_amount: self.to_decimal(gross, "grossAmount")?,
            protocol_fee: self.to_decimal(fee, "protocolFee")?,
            net_amount: self.to_decimal(net, "netAmount")?,
            payment_type,
            transaction_hash: log.transaction_hash,
            log_index: log.log_index,
            block_number: log.block_number,
        })
    }

    /// Normalize a smallest-unit integer to the token's decimal amount
    fn to_decimal(&self, value: U256, field: &'static str) -> Result<Decimal, DecodeError> {
        if value.bit_len() > MAX_AMOUNT_BITS {
            return Err(DecodeError::AmountOutOfRange { field });
        }
        let limbs = value.as_limbs();
        let raw = ((limbs[1] as u128) << 64) | limbs[0] as u128;

        Decimal::try_from_i128_with_scale(raw as i128, self.decimals)
            .map(|d| d.normalize())
            .map_err(|_| DecodeError::AmountOutOfRange { field })
    }
}

/// Best-effort song identifier for quarantine records of undecodable logs
pub fn peek_song_identifier(log: &RawLog) -> Option<B256> {
    match log.topics.first() {
        Some(sig) if *sig == *PAYMENT_PROCESSED_TOPIC => log.topics.get(1).copied(),
        _ => None,
    }
}

fn word(data: &[u8], index: usize) -> U256 {
    U256::from_be_slice(&data[index * WORD..(index + 1) * WORD])
}

fn topic_to_address(topic: &B256) -> Result<Address, DecodeError> {
    if topic[..12].iter().any(|b| *b != 0) {
        return Err(DecodeError::MalformedListener);
    }
    Ok(Address::from_slice(&topic[12..]))
}

fn decode_payment_type(value: U256) -> Result<PaymentType, DecodeError> {
    if value > U256::from(u8::MAX) {
        return Err(DecodeError::MalformedPaymentType);
    }
    PaymentType::try_from(value.as_limbs()[0] as u8)
}

fn check_position(field: &'static str, value: u64) -> Result<(), DecodeError> {
    if value > i64::MAX as u64 {
        return Err(DecodeError::PositionOutOfRange { field, value });
    }
    Ok(())
}
