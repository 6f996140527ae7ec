//! Error types for the alert pipeline.

use thiserror::Error;

/// Main error type for pipeline and collaborator operations.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CBOR decode error: {0}")]
    Cbor(String),

    #[error("Malformed CAR payload: {0}")]
    Car(String),

    #[error("Malformed frame: {0}")]
    Frame(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited by {0}")]
    RateLimited(String),

    #[error("API error {status} from {method}: {message}")]
    Api {
        method: String,
        status: u16,
        message: String,
    },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("Stream error {error}: {message}")]
    StreamError { error: String, message: String },

    #[error("Stream closed by relay")]
    StreamClosed,

    #[error("Could not connect to relay after {attempts} attempts: {last}")]
    ConnectExhausted { attempts: u32, last: String },

    #[error("Work queue is full")]
    QueueFull,

    #[error("Work queue is closed")]
    QueueClosed,

    #[error("Worker panicked: {0}")]
    WorkerPanic(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Data directory is locked by another firehose process")]
    Locked,

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid cursor file: {0}")]
    InvalidCursorFile(String),
}

impl AlertError {
    /// Whether retrying the same unit of work may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AlertError::Network(_)
            | AlertError::Timeout
            | AlertError::RateLimited(_)
            | AlertError::StreamClosed
            | AlertError::SessionExpired => true,
            AlertError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::UnexpectedEof
            ),
            AlertError::Api { status, .. } => *status >= 500,
            AlertError::StreamError { error, .. } => error == "ConsumerTooSlow",
            _ => false,
        }
    }

    /// Whether the error must bring the whole process down.
    pub fn is_fatal(&self) -> bool {
        match self {
            AlertError::Auth(_)
            | AlertError::ConnectExhausted { .. }
            | AlertError::WorkerPanic(_)
            | AlertError::Locked => true,
            AlertError::StreamError { .. } => !self.is_transient(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for AlertError {
    fn from(e: serde_json::Error) -> Self {
        AlertError::Json(e.to_string())
    }
}

impl From<serde_yaml::Error> for AlertError {
    fn from(e: serde_yaml::Error) -> Self {
        AlertError::Yaml(e.to_string())
    }
}

impl<E: std::fmt::Debug> From<serde_ipld_dagcbor::DecodeError<E>> for AlertError {
    fn from(e: serde_ipld_dagcbor::DecodeError<E>) -> Self {
        AlertError::Cbor(format!("{:?}", e))
    }
}

impl From<tungstenite::Error> for AlertError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                AlertError::StreamClosed
            }
            tungstenite::Error::Io(io) => AlertError::Io(io),
            tungstenite::Error::Http(response) if response.status().as_u16() == 401 => {
                AlertError::Auth(format!("relay rejected handshake: {}", response.status()))
            }
            other => AlertError::Network(other.to_string()),
        }
    }
}

impl From<ureq::Error> for AlertError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::Timeout(_) => AlertError::Timeout,
            ureq::Error::Io(io) => AlertError::Io(io),
            ureq::Error::StatusCode(429) => AlertError::RateLimited("api".to_string()),
            other => AlertError::Network(other.to_string()),
        }
    }
}

/// Result type for alert pipeline operations.
pub type Result<T> = std::result::Result<T, AlertError>;
