//! Transport error types

use crate::ConnectionState;
use std::io;
use thiserror::Error;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel is not open for sending
    #[error("Transport is not open (state: {0})")]
    NotOpen(ConnectionState),

    /// The transport was already started
    #[error("Transport already started")]
    AlreadyStarted,

    /// Connect failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Frame exceeds the configured limit
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// The stream ended in the middle of a frame
    #[error("Truncated frame at end of stream")]
    TruncatedFrame,
}
