//! Wire encodings for messages
//!
//! A codec turns one [`Message`] into one self-contained byte payload and
//! back. Framing is the transport's concern.

use crate::{Message, PropertyValue, ProtocolError};
use bytes::Bytes;
use std::sync::Arc;

/// Protocol name of the JSON codec
pub const JSON_PROTOCOL: &str = "Basil-JSON";

/// Protocol name of the MessagePack codec
#[cfg(feature = "rmp-serde")]
pub const MSGPACK_PROTOCOL: &str = "Basil-MsgPack";

fn finite(key: &str, values: &[f64]) -> Result<(), ProtocolError> {
    match values.iter().find(|v| !v.is_finite()) {
        Some(v) => Err(ProtocolError::Serialization(format!(
            "non-finite number {} in {}",
            v, key
        ))),
        None => Ok(()),
    }
}

/// Reject NaN and infinities, which no wire format here can carry back.
fn ensure_finite(message: &Message) -> Result<(), ProtocolError> {
    for (key, value) in message.i_props.iter() {
        match value {
            PropertyValue::Number(n) => finite(key, std::slice::from_ref(n))?,
            PropertyValue::NumberArray(values) => finite(key, values)?,
            PropertyValue::String(_) | PropertyValue::StringArray(_) => {}
        }
    }
    for block in &message.pos {
        for (key, values) in [
            ("pos", &block.pos),
            ("rot", &block.rot),
            ("vel", &block.vel),
            ("path", &block.path),
        ] {
            if let Some(values) = values {
                finite(key, values)?;
            }
        }
    }
    Ok(())
}

/// A message encoding
pub trait MessageCodec: Send + Sync {
    /// Protocol name
    fn name(&self) -> &'static str;

    /// Encode a message into a payload.
    ///
    /// Non-finite numbers are rejected with [`ProtocolError::Serialization`].
    fn encode(&self, message: &Message) -> Result<Bytes, ProtocolError>;

    /// Decode a payload into a message
    fn decode(&self, payload: &[u8]) -> Result<Message, ProtocolError>;
}

/// Self-describing JSON text
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn name(&self) -> &'static str {
        JSON_PROTOCOL
    }

    fn encode(&self, message: &Message) -> Result<Bytes, ProtocolError> {
        ensure_finite(message)?;
        serde_json::to_vec(message)
            .map(Bytes::from)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> Result<Message, ProtocolError> {
        serde_json::from_slice(payload).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// MessagePack with named fields
#[cfg(feature = "rmp-serde")]
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

#[cfg(feature = "rmp-serde")]
impl MessageCodec for MsgPackCodec {
    fn name(&self) -> &'static str {
        MSGPACK_PROTOCOL
    }

    fn encode(&self, message: &Message) -> Result<Bytes, ProtocolError> {
        ensure_finite(message)?;
        rmp_serde::to_vec_named(message)
            .map(Bytes::from)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> Result<Message, ProtocolError> {
        rmp_serde::from_slice(payload).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// Look up a codec by protocol name
pub fn codec_for(name: &str) -> Result<Arc<dyn MessageCodec>, ProtocolError> {
    match name {
        JSON_PROTOCOL => Ok(Arc::new(JsonCodec)),
        #[cfg(feature = "rmp-serde")]
        MSGPACK_PROTOCOL => Ok(Arc::new(MsgPackCodec)),
        other => Err(ProtocolError::UnknownProtocol(other.to_string())),
    }
}
