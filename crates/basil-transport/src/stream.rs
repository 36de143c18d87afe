//! Stream transport over TCP or any async byte stream
//!
//! Each started transport runs two tasks: a write loop draining the outbound
//! queue into the stream and a read loop splitting the stream into frames for
//! the receive callback. Both stop on a shared cancellation token.

use crate::frame::{FrameCodec, MAX_FRAME_SIZE};
use crate::{
    ConnectionState, ReceiveCallback, StateCell, StateReceiver, Transport, TransportError,
    TransportInfo, TransportType,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Capacity of the in-memory pipe built by [`StreamTransport::pair`]
const PAIR_BUFFER: usize = 64 * 1024;

/// Stream transport configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Name used in logs
    pub name: String,
    /// Largest frame accepted in either direction
    pub max_frame_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: "basil".to_string(),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl StreamConfig {
    /// Default configuration with a log name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the frame size limit
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

enum Endpoint {
    Connect(String),
    Stream(BoxReader, BoxWriter),
}

struct Shared {
    name: String,
    state: StateCell,
    callback: RwLock<Option<ReceiveCallback>>,
    outbound: mpsc::UnboundedSender<Bytes>,
    cancel: CancellationToken,
    max_frame_size: usize,
}

impl Shared {
    /// Record a fault and stop both loops
    fn fail(&self, reason: String) {
        self.state.transition(ConnectionState::Error, Some(reason));
        self.cancel.cancel();
    }

    /// Begin an orderly shutdown and stop both loops
    fn shut_down(&self) {
        self.state.transition(ConnectionState::Closing, None);
        self.cancel.cancel();
    }

    fn deliver(&self, frame: Bytes) {
        let callback = self
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match callback {
            Some(callback) => callback(frame),
            None => debug!(transport = %self.name, len = frame.len(), "No receive callback, dropping frame"),
        }
    }
}

/// Transport over a TCP connection or any `AsyncRead + AsyncWrite` stream
pub struct StreamTransport {
    shared: Arc<Shared>,
    info: TransportInfo,
    idle: Mutex<Option<(Endpoint, mpsc::UnboundedReceiver<Bytes>)>>,
}

impl StreamTransport {
    fn build(endpoint: Endpoint, info: TransportInfo, config: StreamConfig) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                name: config.name.clone(),
                state: StateCell::new(config.name),
                callback: RwLock::new(None),
                outbound,
                cancel: CancellationToken::new(),
                max_frame_size: config.max_frame_size,
            }),
            info,
            idle: Mutex::new(Some((endpoint, outbound_rx))),
        }
    }

    /// Transport that dials `addr` over TCP when started
    pub fn connect(addr: impl Into<String>, config: StreamConfig) -> Self {
        let addr = addr.into();
        let info = TransportInfo {
            name: config.name.clone(),
            peer: Some(addr.clone()),
            transport_type: TransportType::Tcp,
        };
        Self::build(Endpoint::Connect(addr), info, config)
    }

    /// Transport over an accepted TCP connection
    pub fn from_tcp(stream: TcpStream, config: StreamConfig) -> Self {
        let peer = stream.peer_addr().ok().map(|addr| addr.to_string());
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();
        let info = TransportInfo {
            name: config.name.clone(),
            peer,
            transport_type: TransportType::Tcp,
        };
        Self::build(Endpoint::Stream(Box::new(reader), Box::new(writer)), info, config)
    }

    /// Transport over an arbitrary byte stream
    pub fn from_stream<S>(stream: S, config: StreamConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let info = TransportInfo {
            name: config.name.clone(),
            peer: None,
            transport_type: TransportType::Stream,
        };
        Self::build(Endpoint::Stream(Box::new(reader), Box::new(writer)), info, config)
    }

    /// Two transports joined by an in-memory pipe
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(PAIR_BUFFER);
        (
            Self::from_stream(a, StreamConfig::new("pair-a")),
            Self::from_stream(b, StreamConfig::new("pair-b")),
        )
    }

    fn take_idle(&self) -> Option<(Endpoint, mpsc::UnboundedReceiver<Bytes>)> {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn open_endpoint(&self, endpoint: Endpoint) -> Result<(BoxReader, BoxWriter), TransportError> {
        match endpoint {
            Endpoint::Stream(reader, writer) => Ok((reader, writer)),
            Endpoint::Connect(addr) => {
                debug!(transport = %self.shared.name, %addr, "Connecting");
                let stream = tokio::select! {
                    result = TcpStream::connect(&addr) => result.map_err(|e| {
                        TransportError::Connection(format!("{}: {}", addr, e))
                    })?,
                    _ = self.shared.cancel.cancelled() => {
                        return Err(TransportError::NotOpen(self.shared.state.get()));
                    }
                };
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "Failed to set TCP_NODELAY");
                }
                let (reader, writer) = stream.into_split();
                Ok((Box::new(reader), Box::new(writer)))
            }
        }
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let (endpoint, outbound_rx) = self.take_idle().ok_or(TransportError::AlreadyStarted)?;

        let (reader, writer) = match self.open_endpoint(endpoint).await {
            Ok(halves) => halves,
            Err(e) => {
                if !matches!(e, TransportError::NotOpen(_)) {
                    warn!(transport = %self.shared.name, error = %e, "Failed to open transport");
                    self.shared.fail(e.to_string());
                }
                self.shared.state.transition(ConnectionState::Closed, None);
                return Err(e);
            }
        };

        if !self.shared.state.transition(ConnectionState::Open, None) {
            // Closed while connecting.
            self.shared.state.transition(ConnectionState::Closed, None);
            return Err(TransportError::NotOpen(self.shared.state.get()));
        }
        info!(transport = %self.shared.name, peer = ?self.info.peer, "Transport open");

        let read_task = tokio::spawn(read_loop(self.shared.clone(), reader));
        let write_task = tokio::spawn(write_loop(self.shared.clone(), writer, outbound_rx));
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let _ = read_task.await;
            let _ = write_task.await;
            shared.state.transition(ConnectionState::Closing, None);
            shared.state.transition(ConnectionState::Closed, None);
            debug!(transport = %shared.name, "I/O loops stopped");
        });
        Ok(())
    }

    fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        let state = self.shared.state.get();
        if state != ConnectionState::Open {
            return Err(TransportError::NotOpen(state));
        }
        if frame.len() > self.shared.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: frame.len(),
                max: self.shared.max_frame_size,
            });
        }
        self.shared
            .outbound
            .send(frame)
            .map_err(|_| TransportError::NotOpen(self.shared.state.get()))
    }

    fn close(&self) {
        let never_started = self.take_idle().is_some();
        self.shared.shut_down();
        if never_started {
            self.shared.state.transition(ConnectionState::Closed, None);
        }
    }

    fn set_receive_callback(&self, callback: ReceiveCallback) {
        *self
            .shared
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    fn subscribe(&self) -> (ConnectionState, StateReceiver) {
        self.shared.state.subscribe()
    }

    fn info(&self) -> &TransportInfo {
        &self.info
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

async fn read_loop(shared: Arc<Shared>, mut reader: BoxReader) {
    let mut codec = FrameCodec::with_max_frame_size(shared.max_frame_size);
    debug!(transport = %shared.name, "Read loop started");
    loop {
        let result = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            result = codec.read_frame(&mut reader) => result,
        };
        match result {
            Ok(Some(frame)) => shared.deliver(frame),
            Ok(None) => {
                debug!(transport = %shared.name, "Peer closed the stream");
                shared.shut_down();
                break;
            }
            Err(e) => {
                warn!(transport = %shared.name, error = %e, "Read failed");
                shared.fail(e.to_string());
                break;
            }
        }
    }
    debug!(transport = %shared.name, "Read loop stopped");
}

async fn write_loop(
    shared: Arc<Shared>,
    mut writer: BoxWriter,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
) {
    let codec = FrameCodec::with_max_frame_size(shared.max_frame_size);
    debug!(transport = %shared.name, "Write loop started");
    loop {
        let frame = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        if let Err(e) = codec.write_frame(&mut writer, &frame).await {
            warn!(transport = %shared.name, error = %e, "Write failed");
            shared.fail(e.to_string());
            break;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!(transport = %shared.name, error = %e, "Shutdown of write half failed");
    }
    debug!(transport = %shared.name, "Write loop stopped");
}
