//! Error types for taskmesh

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Coordination store errors ===
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Key already exists: {0}")]
    KeyExists(String),

    #[error("Lease expired: {0}")]
    LeaseExpired(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Watch closed: {0}")]
    WatchClosed(String),

    // === Data transport errors ===
    #[error("Epoch mismatch: peer is at epoch {current}")]
    EpochMismatch { current: u64 },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Framework errors ===
    #[error("No address known for slot {0}")]
    AddressUnknown(u64),

    #[error("Slot {from} is not a neighbor")]
    NotNeighbor { from: u64 },

    #[error("No slot held")]
    NoSlot,

    // === Config errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::ConnectionFailed(_)
                | Error::AddressUnknown(_)
                | Error::WatchClosed(_)
        )
    }

    /// Convert to HTTP status code for data-request responses
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::EpochMismatch { .. } => StatusCode::CONFLICT,
            Error::NotNeighbor { .. } | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::KeyNotFound(_) => StatusCode::NOT_FOUND,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_connect() {
            Error::ConnectionFailed(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}
