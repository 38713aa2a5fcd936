//! Error types for Stratum v1 protocol.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Stratum protocol errors.
#[derive(Error, Debug)]
pub enum StratumError {
    /// Network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Well-formed JSON that doesn't carry what the method requires
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Pool sent a line longer than we are willing to buffer
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    /// Connection lost
    #[error("Connection lost")]
    Disconnected,

    /// Nothing arrived from the pool within the idle timeout
    #[error("Timeout waiting for pool")]
    Timeout,
}

impl StratumError {
    /// True for errors after which the session cannot continue.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StratumError::Json(_) | StratumError::InvalidMessage(_))
    }
}

impl From<LinesCodecError> for StratumError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                StratumError::LineTooLong(super::connection::MAX_LINE_LENGTH)
            }
            LinesCodecError::Io(e) => StratumError::Io(e),
        }
    }
}

/// Convenient Result type for Stratum operations.
pub type StratumResult<T> = Result<T, StratumError>;
