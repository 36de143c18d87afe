//! Alive-check liveness probe

use crate::protocol::now_millis;
use crate::{BasilConnection, OpHandler, Result};
use async_trait::async_trait;
use basil_proto::{Message, PropertyBag};
use std::sync::atomic::{AtomicU64, Ordering};

/// Sender's timestamp
pub const TIME_PROP: &str = "time";
/// Sender's sequence number
pub const SEQUENCE_NUM_PROP: &str = "sequenceNum";
/// Timestamp echoed from the request
pub const TIME_RECEIVED_PROP: &str = "timeReceived";
/// Sequence number echoed from the request
pub const SEQUENCE_NUM_RECEIVED_PROP: &str = "sequenceNumReceived";

/// Monotonic sequence for alive-check messages
#[derive(Debug)]
pub struct AliveSequence(AtomicU64);

impl Default for AliveSequence {
    fn default() -> Self {
        Self(AtomicU64::new(1))
    }
}

impl AliveSequence {
    /// Next sequence number
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Properties for an outgoing probe or reply
    pub fn stamp(&self) -> PropertyBag {
        PropertyBag::new()
            .with(TIME_PROP, now_millis().to_string())
            .with(SEQUENCE_NUM_PROP, self.next().to_string())
    }
}

/// Answers AliveCheck requests.
///
/// The reply carries this side's time and sequence number and echoes the
/// request's values, or `"0"` where the request had none.
#[derive(Debug, Default)]
pub struct AliveCheckHandler {
    sequence: AliveSequence,
}

impl AliveCheckHandler {
    /// Create a handler with its own sequence
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OpHandler for AliveCheckHandler {
    async fn handle(&self, request: Message, _connection: &BasilConnection) -> Result<Option<Message>> {
        let mut reply = request.make_response();
        let mut props = self.sequence.stamp();
        props.insert(
            TIME_RECEIVED_PROP,
            request.i_props.get_str(TIME_PROP).unwrap_or("0"),
        );
        props.insert(
            SEQUENCE_NUM_RECEIVED_PROP,
            request.i_props.get_str(SEQUENCE_NUM_PROP).unwrap_or("0"),
        );
        reply.i_props = props;
        Ok(Some(reply))
    }
}
