//! Protocol layer binding a message codec to a transport

use crate::Result;
use basil_proto::{codec_for, Message, MessageCodec, ProtocolError};
use basil_transport::{ConnectionState, StateReceiver, Transport};
use bytes::Bytes;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{trace, warn};

/// Consumer of decoded inbound messages.
///
/// Decode failures are delivered as errors; the transport keeps running.
pub type MessageCallback = Arc<dyn Fn(std::result::Result<Message, ProtocolError>) + Send + Sync>;

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Encodes outbound messages onto a transport and decodes inbound frames
pub struct Protocol {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn MessageCodec>,
}

impl Protocol {
    /// Bind a codec to a transport
    pub fn new(transport: Arc<dyn Transport>, codec: Arc<dyn MessageCodec>) -> Self {
        Self { transport, codec }
    }

    /// Bind the codec registered under `name` to a transport
    pub fn with_name(transport: Arc<dyn Transport>, name: &str) -> Result<Self> {
        Ok(Self::new(transport, codec_for(name)?))
    }

    /// Protocol name of the codec
    pub fn name(&self) -> &'static str {
        self.codec.name()
    }

    /// The underlying transport
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Encode and queue a message, stamping `sendTime` if unset
    pub fn send(&self, mut message: Message) -> Result<()> {
        if message.send_time == 0 {
            message.send_time = now_millis();
        }
        let frame = self.codec.encode(&message)?;
        trace!(op = message.op_name(), len = frame.len(), "Sending message");
        self.transport.send(frame)?;
        Ok(())
    }

    /// Decode one frame
    pub fn decode(&self, frame: &[u8]) -> std::result::Result<Message, ProtocolError> {
        self.codec.decode(frame)
    }

    /// Route inbound frames through the codec to `callback`
    pub fn set_receive_callback(&self, callback: MessageCallback) {
        let codec = self.codec.clone();
        self.transport.set_receive_callback(Arc::new(move |frame: Bytes| {
            let result = codec.decode(&frame);
            if let Err(e) = &result {
                warn!(protocol = codec.name(), len = frame.len(), error = %e, "Failed to decode message");
            }
            callback(result);
        }));
    }

    /// Observe transport state changes
    pub fn subscribe(&self) -> (ConnectionState, StateReceiver) {
        self.transport.subscribe()
    }

    /// Current transport state
    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Start the transport
    pub async fn start(&self) -> Result<()> {
        self.transport.start().await?;
        Ok(())
    }

    /// Close the transport
    pub fn close(&self) {
        self.transport.close();
    }
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("codec", &self.codec.name())
            .field("transport", self.transport.info())
            .finish()
    }
}
