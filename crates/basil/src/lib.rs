//! # Basil
//!
//! Layered message transport for Basil viewers and space services.
//!
//! A connection stacks three layers: a [`transport`] moving byte frames, a
//! [`Protocol`] encoding messages with a named codec, and a
//! [`BasilConnection`] correlating requests with their responses and handing
//! everything else to an [`IncomingMessageProcessor`].

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use basil_proto as proto;
pub use basil_transport as transport;

/// Error types for the Basil library
pub mod error;

/// Codec bound to a transport
pub mod protocol;

/// RPC correlation, authorization and readiness
pub mod connection;

/// Handlers for inbound requests and notifications
pub mod processor;

/// Alive-check probe
pub mod alive;

/// Connection settings
pub mod config;

/// Outbound connection builder
pub mod builder;

/// Inbound connection listener
pub mod listener;

pub use alive::AliveCheckHandler;
pub use builder::ConnectionBuilder;
pub use config::{ConnectionConfig, DEFAULT_RPC_TIMEOUT};
pub use connection::{BasilConnection, PendingRpcInfo, FILTER_PROP, NOT_AUTHORIZED};
pub use error::BasilError;
pub use listener::BasilListener;
pub use processor::{
    handler_fn, FnHandler, IncomingMessageProcessor, NotOpenProcessor, OpDispatcher, OpHandler,
    SESSION_NOT_OPEN,
};
pub use protocol::{MessageCallback, Protocol};

pub use basil_proto::{AbilityList, AuthToken, Message, Op, PropertyBag, PropertyValue};
pub use basil_transport::ConnectionState;

/// Result type alias for Basil operations
pub type Result<T> = std::result::Result<T, BasilError>;
