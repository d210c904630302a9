// Error taxonomy for collection and persistence. Worker loops and main use anyhow on top.

use thiserror::Error;

use crate::retry::RetryableError;

/// Failure to obtain telemetry from a device.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("device answered with HTTP {0}")]
    Http(u16),
    #[error("response is not a telemetry object: {0}")]
    InvalidPayload(String),
}

impl NetworkError {
    /// Status tag recorded on the failure sample.
    pub fn status_tag(&self) -> crate::models::SampleStatus {
        use crate::models::SampleStatus;
        match self {
            NetworkError::Timeout => SampleStatus::Timeout,
            NetworkError::ConnectionFailed(_) => SampleStatus::ConnectionFailed,
            NetworkError::Http(_) => SampleStatus::HttpError,
            NetworkError::InvalidPayload(_) => SampleStatus::InvalidPayload,
        }
    }

    /// The device answered but sent garbage. Does not count toward the fleet circuit breaker.
    pub fn is_data_failure(&self) -> bool {
        matches!(self, NetworkError::InvalidPayload(_))
    }
}

impl RetryableError for NetworkError {
    fn is_retryable(&self) -> bool {
        match self {
            NetworkError::Timeout | NetworkError::ConnectionFailed(_) => true,
            NetworkError::Http(code) => *code >= 500 || *code == 429,
            NetworkError::InvalidPayload(_) => false,
        }
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            NetworkError::Timeout
        } else if let Some(status) = e.status() {
            NetworkError::Http(status.as_u16())
        } else if e.is_decode() {
            NetworkError::InvalidPayload(e.to_string())
        } else {
            NetworkError::ConnectionFailed(e.to_string())
        }
    }
}

/// A single payload field that failed validation. The field is dropped, the sample is kept.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {reason}")]
pub struct DataValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl DataValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Failure to read or write durable state.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database locked: {0}")]
    LockTimeout(String),
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt data: {0}")]
    Corruption(String),
    #[error("encode error: {0}")]
    Encode(String),
}

impl From<sqlx::Error> for PersistenceError {
    fn from(e: sqlx::Error) -> Self {
        if is_lock_error(&e) {
            PersistenceError::LockTimeout(e.to_string())
        } else {
            PersistenceError::Database(e)
        }
    }
}

impl From<csv::Error> for PersistenceError {
    fn from(e: csv::Error) -> Self {
        if e.is_io_error() {
            match e.into_kind() {
                csv::ErrorKind::Io(io) => PersistenceError::Io(io),
                other => PersistenceError::Corruption(format!("{:?}", other)),
            }
        } else {
            PersistenceError::Corruption(e.to_string())
        }
    }
}

impl RetryableError for PersistenceError {
    fn is_retryable(&self) -> bool {
        matches!(self, PersistenceError::LockTimeout(_) | PersistenceError::Io(_))
    }
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes.
fn is_lock_error(e: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db) = e else {
        return false;
    };
    match db.code() {
        Some(code) => code
            .parse::<i32>()
            .map(|c| matches!(c & 0xff, 5 | 6))
            .unwrap_or(false),
        None => {
            let msg = db.message();
            msg.contains("database is locked") || msg.contains("database table is locked")
        }
    }
}
