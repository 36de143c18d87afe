//! Error types for the Basil library

use basil_proto::{Message, ProtocolError};
use basil_transport::{ConnectionState, TransportError};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Main error type for Basil operations
#[derive(Debug, Error)]
pub enum BasilError {
    /// Transport-related errors
    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// Encoding or decoding errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The peer answered with an exception
    #[error("Remote error: {reason}")]
    Remote {
        /// Exception text from the response
        reason: String,
        /// Exception hints from the response
        hints: HashMap<String, String>,
    },

    /// No response arrived in time
    #[error("Timeout after {duration:?}")]
    Timeout {
        /// Duration that was exceeded
        duration: Duration,
    },

    /// The connection went away before a response arrived
    #[error("Connection closed")]
    ConnectionClosed,

    /// The channel is not open for sending
    #[error("Connection is not open (state: {0})")]
    NotOpen(ConnectionState),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An incoming-message handler failed
    #[error("Processor error: {0}")]
    Processor(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BasilError {
    /// The remote error carried by a response, if any
    pub fn from_response(response: &Message) -> Option<Self> {
        if !response.has_exception() {
            return None;
        }
        Some(Self::Remote {
            reason: response.exception.clone().unwrap_or_default(),
            hints: response.exception_hints.clone(),
        })
    }

    /// Whether this error came from the peer rather than the local stack
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

impl From<TransportError> for BasilError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotOpen(state) => Self::NotOpen(state),
            other => Self::Transport(other),
        }
    }
}
