//! # Basil Protocol
//!
//! The message envelope, property values, abilities and wire codecs shared by
//! Basil viewers and space services.

#![warn(missing_docs)]

/// Polymorphic property values and the property bag
pub mod property;

/// Message envelope, operation codes and position records
pub mod message;

/// Wire encodings for messages
pub mod codec;

/// Ability descriptors and the ability collector
pub mod ability;

/// Concrete ability definitions
pub mod abilities;

/// Error types for protocol operations
pub mod error;

pub use ability::{Ability, AbilityDescriptor, AbilityList, PropertySpec, ABILITIES_PROP};
pub use codec::{codec_for, JsonCodec, MessageCodec, JSON_PROTOCOL};
#[cfg(feature = "rmp-serde")]
pub use codec::{MsgPackCodec, MSGPACK_PROTOCOL};
pub use error::ProtocolError;
pub use message::{AuthToken, CoordSystem, Message, MessageKind, Op, PositionBlock, RotationSystem};
pub use property::{PropertyBag, PropertyKind, PropertyValue};
