//! Incoming message processors
//!
//! Every inbound message that is not a response goes to the connection's
//! [`IncomingMessageProcessor`]. [`OpDispatcher`] routes by operation code to
//! per-op [`OpHandler`]s.

use crate::{BasilConnection, BasilError, Protocol, Result};
use async_trait::async_trait;
use basil_proto::{Message, MessageKind, Op};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// Exception text of the default processor's replies
pub const SESSION_NOT_OPEN: &str = "Session is not open.";

/// Handles inbound requests and notifications
#[async_trait]
pub trait IncomingMessageProcessor: Send + Sync {
    /// Process one message received on `connection` through `protocol`
    async fn process(
        &self,
        message: Message,
        connection: &BasilConnection,
        protocol: &Protocol,
    ) -> Result<()>;
}

/// Default processor: answers every request with [`SESSION_NOT_OPEN`]
#[derive(Debug, Clone, Copy, Default)]
pub struct NotOpenProcessor;

#[async_trait]
impl IncomingMessageProcessor for NotOpenProcessor {
    async fn process(
        &self,
        message: Message,
        connection: &BasilConnection,
        _protocol: &Protocol,
    ) -> Result<()> {
        if message.kind() != MessageKind::Request {
            debug!(op = message.op_name(), "Dropping notification, session not open");
            return Ok(());
        }
        connection.send(message.make_response().with_exception(SESSION_NOT_OPEN), None)
    }
}

/// Handles one operation code
#[async_trait]
pub trait OpHandler: Send + Sync {
    /// Handle a request. A returned message is sent back as the reply.
    async fn handle(&self, request: Message, connection: &BasilConnection) -> Result<Option<Message>>;
}

/// [`OpHandler`] built from an async closure
pub struct FnHandler<F>(F);

/// Wrap an async closure as an [`OpHandler`]
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Message, BasilConnection) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Message>>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> OpHandler for FnHandler<F>
where
    F: Fn(Message, BasilConnection) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Message>>> + Send,
{
    async fn handle(&self, request: Message, connection: &BasilConnection) -> Result<Option<Message>> {
        (self.0)(request, connection.clone()).await
    }
}

/// Routes messages to per-op handlers.
///
/// Handlers can be added, replaced or removed while the dispatcher is
/// installed. Operations without a handler get the [`NotOpenProcessor`] reply.
#[derive(Default)]
pub struct OpDispatcher {
    handlers: RwLock<HashMap<u32, Arc<dyn OpHandler>>>,
}

impl OpDispatcher {
    /// Create a dispatcher with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`OpDispatcher::register`]
    pub fn with_handler(self, op: Op, handler: impl OpHandler + 'static) -> Self {
        self.register(op, handler);
        self
    }

    /// Add or replace the handler for `op`, returning the previous one
    pub fn register(&self, op: Op, handler: impl OpHandler + 'static) -> Option<Arc<dyn OpHandler>> {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op.code(), Arc::new(handler))
    }

    /// Remove the handler for `op`
    pub fn remove(&self, op: Op) -> Option<Arc<dyn OpHandler>> {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&op.code())
    }

    /// Whether a handler is registered for `op`
    pub fn contains(&self, op: Op) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&op.code())
    }

    fn handler(&self, op: u32) -> Option<Arc<dyn OpHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&op)
            .cloned()
    }
}

#[async_trait]
impl IncomingMessageProcessor for OpDispatcher {
    async fn process(
        &self,
        message: Message,
        connection: &BasilConnection,
        protocol: &Protocol,
    ) -> Result<()> {
        let Some(handler) = self.handler(message.op) else {
            return NotOpenProcessor.process(message, connection, protocol).await;
        };

        let op_name = message.op_name();
        let is_request = message.kind() == MessageKind::Request;
        let template = message.make_response();
        match handler.handle(message, connection).await {
            Ok(Some(mut reply)) => {
                if reply.r_code.is_none() {
                    reply.r_code = template.r_code;
                }
                if reply.op == Op::Unknown.code() {
                    reply.op = template.op;
                }
                connection.send(reply, None)
            }
            Ok(None) => Ok(()),
            Err(e) => {
                warn!(op = op_name, error = %e, "Handler failed");
                if is_request {
                    connection.send(template.with_exception(e.to_string()), None)?;
                }
                Err(BasilError::Processor(e.to_string()))
            }
        }
    }
}
