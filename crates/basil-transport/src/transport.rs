//! Transport abstraction

use crate::{ConnectionState, StateReceiver, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Consumer of inbound frames.
///
/// Invoked from the transport's read loop; it must hand the frame off
/// without waiting on application work.
pub type ReceiveCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Moves opaque byte frames across a channel and reports state changes
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the channel and start the I/O loops.
    ///
    /// Moves INITIALIZING to OPEN, or to ERROR and then CLOSED on failure.
    /// A second call fails with [`TransportError::AlreadyStarted`].
    async fn start(&self) -> Result<(), TransportError>;

    /// Queue a frame for transmission without waiting on the network.
    ///
    /// Fails with [`TransportError::NotOpen`] unless the state is OPEN.
    fn send(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Request an orderly shutdown. Safe to call more than once.
    fn close(&self);

    /// Register the single consumer of inbound frames; the last registration wins
    fn set_receive_callback(&self, callback: ReceiveCallback);

    /// Current state
    fn state(&self) -> ConnectionState;

    /// Observe state changes, starting from the returned current state
    fn subscribe(&self) -> (ConnectionState, StateReceiver);

    /// Description of the channel
    fn info(&self) -> &TransportInfo;
}

/// Description of a transport's channel
#[derive(Debug, Clone)]
pub struct TransportInfo {
    /// Name used in logs
    pub name: String,
    /// Remote address, if the channel has one
    pub peer: Option<String>,
    /// Channel kind
    pub transport_type: TransportType,
}

/// Channel kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// TCP socket
    Tcp,
    /// Any other byte stream, such as an in-memory pipe
    Stream,
}
