//! Error types for setu-link

use crate::codec::Command;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// setu-link error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bus adapter fault (fatal, connection is torn down)
    #[error("Bus adapter fault: {0}")]
    Adapter(String),

    /// Adapter receive buffer overrun (fatal, connection is torn down)
    #[error("Adapter receive buffer overrun")]
    BufferOverrun,

    /// No acknowledgment within the retry budget
    #[error("Request {command} timed out after {attempts} attempts")]
    Timeout {
        /// Command that went unanswered
        command: Command,
        /// Total send attempts (initial send + retries)
        attempts: u32,
    },

    /// Device rejected the request with a negative acknowledgment
    #[error("Request {command} rejected by device (negative acknowledgment)")]
    NegativeAck {
        /// Command that was rejected
        command: Command,
        /// Payload of the negative acknowledgment
        payload: Vec<u8>,
    },

    /// Engine already shut down or reader stopped
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Invalid frame or payload
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation timed out at the sub-protocol level (discovery, connect, attribute poll)
    #[error("Operation timed out: {0}")]
    DeadlineExceeded(String),
}
