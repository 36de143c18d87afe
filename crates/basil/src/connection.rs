//! Connection layer: RPC correlation, authorization and readiness
//!
//! A [`BasilConnection`] sits on a [`Protocol`]. Responses are matched to
//! pending RPCs directly on the transport's read loop; every other inbound
//! message is queued to a dispatch task that runs the authorization check and
//! the installed [`IncomingMessageProcessor`].

use crate::alive::AliveSequence;
use crate::protocol::MessageCallback;
use crate::{BasilError, ConnectionConfig, IncomingMessageProcessor, NotOpenProcessor, Protocol, Result};
use basil_proto::{AuthToken, Message, MessageKind, Op, PropertyBag, ProtocolError};
use basil_transport::{ConnectionState, StateChange, StateReceiver};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Exception text sent back to peers that fail the authorization check
pub const NOT_AUTHORIZED: &str = "Not authorized";

/// Property carrying the filter of a RequestProperties call
pub const FILTER_PROP: &str = "Filter";

/// Snapshot of one outstanding RPC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRpcInfo {
    /// Correlation code sent as `sCode`
    pub code: String,
    /// Request operation code
    pub op: u32,
    /// Time since the request was registered
    pub age: Duration,
}

struct PendingRpc {
    op: u32,
    created: Instant,
    completion: oneshot::Sender<Result<Message>>,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<String, PendingRpc>,
    /// Set once the channel is gone; no new entries are accepted
    closed: bool,
}

struct Readiness {
    state: ConnectionState,
    waiters: Vec<oneshot::Sender<bool>>,
}

#[derive(Default)]
struct Authorizations {
    incoming: Option<AuthToken>,
    outgoing: Option<AuthToken>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    protocol: Protocol,
    rpc_timeout: Option<Duration>,
    auth: RwLock<Authorizations>,
    pending: Mutex<PendingTable>,
    readiness: Mutex<Readiness>,
    processor: RwLock<Arc<dyn IncomingMessageProcessor>>,
    inbound: mpsc::UnboundedSender<Message>,
    alive: AliveSequence,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Inner {
    fn authorizations(&self) -> (Option<AuthToken>, Option<AuthToken>) {
        let auth = self.auth.read().unwrap_or_else(PoisonError::into_inner);
        (auth.incoming.clone(), auth.outgoing.clone())
    }

    fn processor(&self) -> Arc<dyn IncomingMessageProcessor> {
        self.processor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Insert a pending entry under a fresh correlation code
    fn register(&self, op: u32, completion: oneshot::Sender<Result<Message>>) -> Result<String> {
        let mut table = lock(&self.pending);
        if table.closed {
            return Err(BasilError::ConnectionClosed);
        }
        let code = loop {
            let candidate = Uuid::new_v4().simple().to_string();
            if !table.entries.contains_key(&candidate) {
                break candidate;
            }
        };
        table.entries.insert(
            code.clone(),
            PendingRpc {
                op,
                created: Instant::now(),
                completion,
            },
        );
        Ok(code)
    }

    /// Complete the pending entry matching a response, at most once
    fn complete(&self, response: Message) {
        let code = response.r_code.clone().unwrap_or_default();
        let entry = lock(&self.pending).entries.remove(&code);
        match entry {
            Some(rpc) => {
                debug!(
                    r_code = %code,
                    op = response.op_name(),
                    elapsed = ?rpc.created.elapsed(),
                    "Completing RPC"
                );
                if rpc.completion.send(Ok(response)).is_err() {
                    debug!(r_code = %code, "RPC caller went away before its response");
                }
            }
            None => warn!(r_code = %code, op = response.op_name(), "No pending RPC for response, dropping"),
        }
    }

    /// Fail every pending entry and refuse new ones
    fn fail_pending(&self) {
        let drained: Vec<(String, PendingRpc)> = {
            let mut table = lock(&self.pending);
            table.closed = true;
            table.entries.drain().collect()
        };
        if !drained.is_empty() {
            info!(count = drained.len(), "Failing pending RPCs, connection closed");
        }
        for (_, rpc) in drained {
            let _ = rpc.completion.send(Err(BasilError::ConnectionClosed));
        }
    }

    fn resolve_waiters(readiness: &mut Readiness, ready: bool) {
        for waiter in readiness.waiters.drain(..) {
            let _ = waiter.send(ready);
        }
    }

    fn on_state_change(&self, change: &StateChange) {
        {
            let mut readiness = lock(&self.readiness);
            readiness.state = change.new;
            match change.new {
                ConnectionState::Open => Self::resolve_waiters(&mut readiness, true),
                ConnectionState::Error | ConnectionState::Closed => {
                    Self::resolve_waiters(&mut readiness, false)
                }
                _ => {}
            }
        }
        match change.new {
            ConnectionState::Error => {
                warn!(reason = change.reason.as_deref().unwrap_or("unknown"), "Transport fault");
                self.fail_pending();
            }
            ConnectionState::Closed => self.fail_pending(),
            _ => {}
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.protocol.close();
    }
}

/// A connection to a Basil peer.
///
/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct BasilConnection {
    inner: Arc<Inner>,
}

impl BasilConnection {
    /// Wrap a protocol. Must be called within a Tokio runtime.
    ///
    /// The connection installs itself as the protocol's receive callback and
    /// starts with [`NotOpenProcessor`] as its processor.
    pub fn new(protocol: Protocol, config: ConnectionConfig) -> Self {
        let (state, state_rx) = protocol.subscribe();
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            protocol,
            rpc_timeout: config.rpc_timeout,
            auth: RwLock::new(Authorizations {
                incoming: config.incoming_auth,
                outgoing: config.outgoing_auth,
            }),
            pending: Mutex::new(PendingTable {
                entries: HashMap::new(),
                closed: matches!(state, ConnectionState::Error | ConnectionState::Closed),
            }),
            readiness: Mutex::new(Readiness {
                state,
                waiters: Vec::new(),
            }),
            processor: RwLock::new(Arc::new(NotOpenProcessor)),
            inbound,
            alive: AliveSequence::default(),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        let on_message: MessageCallback = Arc::new(move |result: std::result::Result<Message, ProtocolError>| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Decode failures were already logged by the protocol.
            let Ok(message) = result else {
                return;
            };
            if message.is_response() {
                inner.complete(message);
            } else if inner.inbound.send(message).is_err() {
                debug!("Dispatch stopped, dropping inbound message");
            }
        });
        inner.protocol.set_receive_callback(on_message);

        tokio::spawn(dispatch_loop(
            Arc::downgrade(&inner),
            inbound_rx,
            inner.cancel.clone(),
        ));
        tokio::spawn(state_loop(
            Arc::downgrade(&inner),
            state_rx,
            inner.cancel.clone(),
        ));

        Self { inner }
    }

    /// Start the underlying transport
    pub async fn start(&self) -> Result<()> {
        self.inner.protocol.start().await
    }

    /// The protocol this connection sends through
    pub fn protocol(&self) -> &Protocol {
        &self.inner.protocol
    }

    /// Current channel state
    pub fn state(&self) -> ConnectionState {
        self.inner.protocol.state()
    }

    /// Resolve `true` once the channel is open, or `false` if it closes first
    pub async fn when_ready(&self) -> bool {
        let waiter = {
            let mut readiness = lock(&self.inner.readiness);
            if self.inner.closed.load(Ordering::SeqCst) {
                return false;
            }
            match readiness.state {
                ConnectionState::Open => return true,
                ConnectionState::Error | ConnectionState::Closed => return false,
                _ => {}
            }
            let (tx, rx) = oneshot::channel();
            readiness.waiters.push(tx);
            rx
        };
        waiter.await.unwrap_or(false)
    }

    /// Replace the processor for inbound requests and notifications
    pub fn set_op_processor(&self, processor: Arc<dyn IncomingMessageProcessor>) {
        *self
            .inner
            .processor
            .write()
            .unwrap_or_else(PoisonError::into_inner) = processor;
    }

    /// Set the inbound and outbound authorization tokens
    pub fn set_authorizations(&self, incoming: Option<AuthToken>, outgoing: Option<AuthToken>) {
        let mut auth = self
            .inner
            .auth
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        auth.incoming = incoming;
        auth.outgoing = outgoing;
    }

    /// Send a message without waiting for a reply.
    ///
    /// Attaches the outgoing token when the message has no `auth` and merges
    /// `extra_props` into its properties.
    pub fn send(&self, mut message: Message, extra_props: Option<&PropertyBag>) -> Result<()> {
        if message.auth.is_none() {
            let (_, outgoing) = self.inner.authorizations();
            message.auth = outgoing.map(|token| token.as_str().to_owned());
        }
        if let Some(extra) = extra_props {
            message.i_props.merge(extra);
        }
        self.inner.protocol.send(message)
    }

    /// Send a request and wait for the response carrying its correlation code.
    ///
    /// Dropping the returned future abandons the RPC and frees its entry.
    pub async fn send_and_await_response(&self, mut request: Message) -> Result<Message> {
        let (tx, rx) = oneshot::channel();
        let code = self.inner.register(request.op, tx)?;
        let _guard = PendingGuard {
            pending: &self.inner.pending,
            code: code.clone(),
        };
        request.s_code = Some(code.clone());
        let op = request.op_name();
        self.send(request, None)?;

        let outcome = match self.inner.rpc_timeout {
            Some(duration) => match timeout(duration, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(s_code = %code, op, ?duration, "RPC timed out");
                    return Err(BasilError::Timeout { duration });
                }
            },
            None => rx.await,
        };
        outcome.unwrap_or(Err(BasilError::ConnectionClosed))
    }

    async fn call(&self, request: Message) -> Result<Message> {
        let response = self.send_and_await_response(request).await?;
        match BasilError::from_response(&response) {
            Some(err) => Err(err),
            None => Ok(response),
        }
    }

    /// Create an item with the given properties
    pub async fn create_item(&self, props: &PropertyBag) -> Result<Message> {
        self.call(Message::new(Op::CreateItemReq).with_props(props))
            .await
    }

    /// Delete an item
    pub async fn delete_item(&self, item_id: &str, item_auth: Option<&AuthToken>) -> Result<Message> {
        let mut request = Message::new(Op::DeleteItemReq).with_item(item_id);
        request.i_auth = item_auth.map(|token| token.as_str().to_owned());
        self.call(request).await
    }

    /// Add abilities to an item
    pub async fn add_ability(&self, item_id: &str, props: &PropertyBag) -> Result<Message> {
        self.call(Message::new(Op::AddAbilityReq).with_item(item_id).with_props(props))
            .await
    }

    /// Remove abilities from an item
    pub async fn remove_ability(&self, item_id: &str, props: &PropertyBag) -> Result<Message> {
        self.call(Message::new(Op::RemoveAbilityReq).with_item(item_id).with_props(props))
            .await
    }

    /// Fetch an item's properties, optionally filtered
    pub async fn request_properties(&self, item_id: &str, filter: Option<&str>) -> Result<Message> {
        let mut request = Message::new(Op::RequestPropertiesReq).with_item(item_id);
        if let Some(filter) = filter {
            request.i_props.insert(FILTER_PROP, filter);
        }
        self.call(request).await
    }

    /// Change an item's properties
    pub async fn update_properties(&self, item_id: &str, props: &PropertyBag) -> Result<Message> {
        self.call(Message::new(Op::UpdatePropertiesReq).with_item(item_id).with_props(props))
            .await
    }

    /// Ask the peer to open a connection described by `props`
    pub async fn make_connection(&self, props: &PropertyBag) -> Result<Message> {
        self.call(Message::new(Op::MakeConnectionReq).with_props(props))
            .await
    }

    /// Open a session
    pub async fn open_session(&self, props: &PropertyBag) -> Result<Message> {
        self.call(Message::new(Op::OpenSessionReq).with_props(props))
            .await
    }

    /// Close a session
    pub async fn close_session(&self, props: &PropertyBag) -> Result<Message> {
        self.call(Message::new(Op::CloseSessionReq).with_props(props))
            .await
    }

    /// Probe the peer. The reply echoes this side's time and sequence number.
    pub async fn alive_check(&self) -> Result<Message> {
        let props = self.inner.alive.stamp();
        self.call(Message::new(Op::AliveCheckReq).with_props(&props))
            .await
    }

    /// Outstanding RPCs, oldest first
    pub fn pending_rpcs(&self) -> Vec<PendingRpcInfo> {
        let table = lock(&self.inner.pending);
        let mut pending: Vec<PendingRpcInfo> = table
            .entries
            .iter()
            .map(|(code, rpc)| PendingRpcInfo {
                code: code.clone(),
                op: rpc.op,
                age: rpc.created.elapsed(),
            })
            .collect();
        pending.sort_by(|a, b| b.age.cmp(&a.age));
        pending
    }

    /// Close the connection. Pending RPCs fail and readiness waiters resolve `false`.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing connection");
        self.inner.protocol.close();
        self.inner.fail_pending();
        Inner::resolve_waiters(&mut lock(&self.inner.readiness), false);
        self.inner.cancel.cancel();
    }

    /// Whether [`BasilConnection::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    async fn dispatch(&self, message: Message) {
        let (incoming, _) = self.inner.authorizations();
        if let Some(expected) = incoming {
            if !expected.matches(message.auth.as_deref()) {
                warn!(op = message.op_name(), "Rejecting unauthorized message");
                if message.kind() == MessageKind::Request {
                    let reply = message.make_response().with_exception(NOT_AUTHORIZED);
                    if let Err(e) = self.send(reply, None) {
                        debug!(error = %e, "Failed to send authorization failure");
                    }
                }
                return;
            }
        }

        let op = message.op_name();
        let processor = self.inner.processor();
        if let Err(e) = processor
            .process(message, self, &self.inner.protocol)
            .await
        {
            error!(op, error = %e, "Incoming message processor failed");
        }
    }
}

impl fmt::Debug for BasilConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasilConnection")
            .field("protocol", &self.inner.protocol)
            .field("state", &self.state())
            .field("pending", &lock(&self.inner.pending).entries.len())
            .finish()
    }
}

/// Removes an RPC's entry when its caller stops waiting
struct PendingGuard<'a> {
    pending: &'a Mutex<PendingTable>,
    code: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).entries.remove(&self.code);
    }
}

async fn dispatch_loop(
    weak: Weak<Inner>,
    mut inbound: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = inbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        let Some(inner) = weak.upgrade() else {
            break;
        };
        BasilConnection { inner }.dispatch(message).await;
    }
    debug!("Dispatch loop stopped");
}

async fn state_loop(weak: Weak<Inner>, mut changes: StateReceiver, cancel: CancellationToken) {
    loop {
        let change = tokio::select! {
            _ = cancel.cancelled() => break,
            change = changes.recv() => match change {
                Some(change) => change,
                None => break,
            },
        };
        let Some(inner) = weak.upgrade() else {
            break;
        };
        inner.on_state_change(&change);
        if change.new.is_terminal() {
            break;
        }
    }
}

#[cfg(test)]
mod tests;
