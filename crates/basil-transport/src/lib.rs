//! # Basil Transport
//!
//! Moves opaque byte frames between peers and reports channel state changes.
//! Nothing in this crate looks inside a frame.

#![warn(missing_docs)]

/// Transport abstraction
pub mod transport;

/// Connection state machine and observers
pub mod state;

/// Length-prefixed framing
pub mod frame;

/// Stream transport over TCP or in-memory pipes
pub mod stream;

/// Transport error types
pub mod error;

pub use error::TransportError;
pub use frame::{FrameCodec, MAX_FRAME_SIZE};
pub use state::{ConnectionState, StateCell, StateChange, StateReceiver};
pub use stream::{StreamConfig, StreamTransport};
pub use transport::{ReceiveCallback, Transport, TransportInfo, TransportType};
