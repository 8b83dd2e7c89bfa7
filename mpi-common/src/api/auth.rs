//! Admin API authentication via timestamp and request signature
//!
//! Every admin request carries two headers:
//! - `x-mpi-timestamp`: Unix epoch milliseconds at signing time
//! - `x-mpi-signature`: hex SHA-256 over the canonical request string
//!   followed by the shared secret
//!
//! The canonical request string is
//! `"{METHOD}\n{path_and_query}\n{timestamp}\n{body}"`.
//!
//! The shared secret lives in the `settings` table under
//! `api_shared_secret`. A secret of `0` disables checking entirely.

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::fmt;

/// Header carrying the signing timestamp (Unix epoch ms)
pub const TIMESTAMP_HEADER: &str = "x-mpi-timestamp";

/// Header carrying the hex SHA-256 request signature
pub const SIGNATURE_HEADER: &str = "x-mpi-signature";

/// Maximum accepted age of a signed request
const MAX_PAST_MS: i64 = 5_000;

/// Maximum accepted clock skew into the future
const MAX_FUTURE_MS: i64 = 1_000;

/// Authentication error types
#[derive(Debug, Clone)]
pub enum ApiAuthError {
    /// Timestamp outside acceptable window
    InvalidTimestamp {
        timestamp: i64,
        now: i64,
        reason: String,
    },

    /// Signature does not match calculated value
    InvalidSignature,

    /// Timestamp header missing or not an integer
    MissingTimestamp,

    /// Signature header missing
    MissingSignature,

    /// Database error loading shared secret
    DatabaseError(String),
}

impl fmt::Display for ApiAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiAuthError::InvalidTimestamp { reason, .. } => {
                write!(f, "Invalid timestamp: {}", reason)
            }
            ApiAuthError::InvalidSignature => write!(f, "Invalid signature"),
            ApiAuthError::MissingTimestamp => write!(f, "Missing {} header", TIMESTAMP_HEADER),
            ApiAuthError::MissingSignature => write!(f, "Missing {} header", SIGNATURE_HEADER),
            ApiAuthError::DatabaseError(err) => write!(f, "Database error: {}", err),
        }
    }
}

impl std::error::Error for ApiAuthError {}

/// Load shared secret from database settings, generating one if absent
pub async fn load_shared_secret(db: &SqlitePool) -> Result<i64, ApiAuthError> {
    let result: Option<(String,)> =
        sqlx::query_as("SELECT value FROM settings WHERE key = 'api_shared_secret'")
            .fetch_optional(db)
            .await
            .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    match result {
        Some((value,)) => value
            .trim()
            .parse::<i64>()
            .map_err(|e| ApiAuthError::DatabaseError(format!("Invalid i64: {}", e))),
        None => initialize_shared_secret(db).await,
    }
}

/// Generate a random non-zero secret and store it
pub async fn initialize_shared_secret(db: &SqlitePool) -> Result<i64, ApiAuthError> {
    use rand::Rng;

    let mut rng = rand::thread_rng();
    let secret: i64 = loop {
        let val = rng.gen::<i64>();
        if val != 0 {
            break val;
        }
    };

    // OR IGNORE: a concurrent initializer may have won; re-read its value
    sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES ('api_shared_secret', ?)")
        .bind(secret.to_string())
        .execute(db)
        .await
        .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    let (stored,): (String,) =
        sqlx::query_as("SELECT value FROM settings WHERE key = 'api_shared_secret'")
            .fetch_one(db)
            .await
            .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    stored
        .parse::<i64>()
        .map_err(|e| ApiAuthError::DatabaseError(format!("Invalid i64: {}", e)))
}

/// Validate a signing timestamp against the current wall clock
pub fn validate_timestamp(timestamp: i64) -> Result<(), ApiAuthError> {
    validate_timestamp_at(timestamp, chrono::Utc::now().timestamp_millis())
}

/// Validate a signing timestamp against an explicit `now`
///
/// Requests may be up to 5000ms old and at most 1000ms in the future.
pub fn validate_timestamp_at(timestamp: i64, now: i64) -> Result<(), ApiAuthError> {
    let diff = now - timestamp;

    if diff > MAX_PAST_MS {
        return Err(ApiAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!("Timestamp {}ms too old (max {}ms past)", diff, MAX_PAST_MS),
        });
    }

    if diff < -MAX_FUTURE_MS {
        return Err(ApiAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!(
                "Timestamp {}ms in future (max {}ms future)",
                diff.abs(),
                MAX_FUTURE_MS
            ),
        });
    }

    Ok(())
}

/// Calculate the request signature
///
/// # Examples
///
/// ```
/// use mpi_common::api::auth::calculate_signature;
///
/// let sig = calculate_signature("POST", "/admin/replay", 1730000000000, b"{}", 42);
/// assert_eq!(sig.len(), 64);
/// ```
pub fn calculate_signature(
    method: &str,
    path_and_query: &str,
    timestamp: i64,
    body: &[u8],
    shared_secret: i64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(path_and_query.as_bytes());
    hasher.update(b"\n");
    hasher.update(timestamp.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(body);
    hasher.update(shared_secret.to_string().as_bytes());

    format!("{:x}", hasher.finalize())
}

/// Validate a provided signature against the calculated value
pub fn validate_signature(
    provided: &str,
    method: &str,
    path_and_query: &str,
    timestamp: i64,
    body: &[u8],
    shared_secret: i64,
) -> Result<(), ApiAuthError> {
    let calculated = calculate_signature(method, path_and_query, timestamp, body, shared_secret);

    // Compare without early exit on the first differing byte
    let provided = provided.trim().to_ascii_lowercase();
    let matches = provided.len() == calculated.len()
        && provided
            .bytes()
            .zip(calculated.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0;

    if !matches {
        return Err(ApiAuthError::InvalidSignature);
    }

    Ok(())
}
