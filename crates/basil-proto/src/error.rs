//! Error types for protocol operations

use crate::property::PropertyKind;
use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A message could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Received bytes could not be decoded into a message
    #[error("Decode error: {0}")]
    Decode(String),

    /// No codec is registered under the requested protocol name
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    /// The key is not declared by the ability
    #[error("Property '{key}' is not part of ability '{ability}'")]
    UnknownProperty {
        /// Ability name
        ability: &'static str,
        /// Offending key
        key: String,
    },

    /// The value kind does not match the ability's declaration
    #[error("Property '{key}' expects {expected:?}, got {actual:?}")]
    PropertyKind {
        /// Property key
        key: String,
        /// Declared kind
        expected: PropertyKind,
        /// Supplied kind
        actual: PropertyKind,
    },
}
