//! Typed errors for each layer.
//!
//! Every fallible operation returns one of these instead of a sentinel number,
//! so callers can tell "no signal" apart from "zero signal".

use thiserror::Error;

/// Failures of the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Failures of an external oracle / API call.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api error: {message} (status: {status})")]
    Api { status: u16, message: String },

    #[error("malformed {what} response: {raw:?}")]
    Malformed { what: &'static str, raw: String },

    #[error("empty {0} response")]
    Empty(&'static str),

    #[error("not configured: {0}")]
    Config(String),

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("cancelled")]
    Cancelled,
}

impl OracleError {
    pub fn malformed(what: &'static str, raw: impl Into<String>) -> Self {
        OracleError::Malformed {
            what,
            raw: raw.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, OracleError::Cancelled)
    }
}

/// Programming-level invalid input, rejected before any query runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("window must be positive, got {0}h")]
    NonPositiveWindow(i64),

    #[error("limit must be positive")]
    NonPositiveLimit,

    #[error("timestamp out of range: {0}")]
    TimestampOutOfRange(i64),
}

/// Reject empty / whitespace-only coin symbols.
pub fn validate_symbol(symbol: &str) -> Result<&str, InputError> {
    let s = symbol.trim();
    if s.is_empty() {
        Err(InputError::EmptySymbol)
    } else {
        Ok(s)
    }
}

/// Failures of `ValueCache::get_value`.
#[derive(Debug, Error)]
pub enum ValueError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("no observation for {coin} and quote source unavailable: {source}")]
    NoObservation { coin: String, source: OracleError },

    #[error("store read failed: {0}")]
    Store(#[from] StoreError),
}

/// Failures of the analytics views.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("store read failed: {0}")]
    Store(#[from] StoreError),
}

/// Failures while assembling or publishing a weekly forecast.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("current price unavailable: {0}")]
    Price(#[from] ValueError),

    #[error("analytics unavailable: {0}")]
    Analytics(#[from] AnalyticsError),

    #[error("{horizon} forecast failed: {source}")]
    Horizon {
        horizon: &'static str,
        source: OracleError,
    },

    #[error("publish failed: {0}")]
    Publish(OracleError),
}
