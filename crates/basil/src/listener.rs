//! Accepting inbound connections

use crate::{BasilConnection, ConnectionConfig, IncomingMessageProcessor, Protocol, Result};
use basil_proto::{codec_for, JSON_PROTOCOL};
use basil_transport::{StreamConfig, StreamTransport, MAX_FRAME_SIZE};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::info;

/// Listens for peers and yields one started [`BasilConnection`] per accept.
pub struct BasilListener {
    listener: TcpListener,
    config: ConnectionConfig,
    protocol: String,
    max_frame_size: usize,
    processor: Option<Arc<dyn IncomingMessageProcessor>>,
    next_peer_id: AtomicU64,
}

impl BasilListener {
    /// Bind to `addr`
    pub async fn bind(addr: impl ToSocketAddrs, config: ConnectionConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            config,
            protocol: JSON_PROTOCOL.to_string(),
            max_frame_size: MAX_FRAME_SIZE,
            processor: None,
            next_peer_id: AtomicU64::new(1),
        })
    }

    /// Wire protocol for accepted connections. Checked on the next accept.
    pub fn with_protocol(mut self, name: impl Into<String>) -> Self {
        self.protocol = name.into();
        self
    }

    /// Frame size limit for accepted connections
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Processor installed on every accepted connection
    pub fn with_processor(mut self, processor: Arc<dyn IncomingMessageProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Local address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for the next peer and return its started connection
    pub async fn accept(&self) -> Result<BasilConnection> {
        let codec = codec_for(&self.protocol)?;
        let (stream, peer) = self.listener.accept().await?;
        let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);

        let stream_config = StreamConfig::new(format!("peer-{}", id)).with_max_frame_size(self.max_frame_size);
        let transport = StreamTransport::from_tcp(stream, stream_config);
        let connection = BasilConnection::new(Protocol::new(Arc::new(transport), codec), self.config.clone());
        if let Some(processor) = &self.processor {
            connection.set_op_processor(processor.clone());
        }
        connection.start().await?;

        info!(%peer, id, "Accepted connection");
        Ok(connection)
    }
}

impl std::fmt::Debug for BasilListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasilListener")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("protocol", &self.protocol)
            .finish()
    }
}
