//! Connection builder
//!
//! Assembles a stream transport, a protocol and a [`BasilConnection`] and
//! starts them in one call.

use crate::{BasilConnection, BasilError, ConnectionConfig, Protocol, Result};
use basil_proto::{codec_for, AuthToken, JSON_PROTOCOL};
use basil_transport::{StreamConfig, StreamTransport, MAX_FRAME_SIZE};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Builder for outbound connections
#[derive(Debug, Clone)]
pub struct ConnectionBuilder {
    addr: String,
    protocol: String,
    config: ConnectionConfig,
    max_frame_size: usize,
}

impl ConnectionBuilder {
    /// Builder for a connection to `addr` (`host:port`)
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            protocol: JSON_PROTOCOL.to_string(),
            config: ConnectionConfig::default(),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Select the wire protocol by name
    pub fn with_protocol(mut self, name: impl Into<String>) -> Self {
        self.protocol = name.into();
        self
    }

    /// Set the RPC timeout; `None` waits forever
    pub fn with_rpc_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config = self.config.with_rpc_timeout(timeout);
        self
    }

    /// Require a token on inbound requests
    pub fn with_incoming_auth(mut self, token: impl Into<AuthToken>) -> Self {
        self.config = self.config.with_incoming_auth(token);
        self
    }

    /// Attach a token to outbound messages
    pub fn with_outgoing_auth(mut self, token: impl Into<AuthToken>) -> Self {
        self.config = self.config.with_outgoing_auth(token);
        self
    }

    /// Limit the size of a single frame
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// The connection settings this builder will apply
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Dial the peer and return a started connection
    pub async fn connect(self) -> Result<BasilConnection> {
        let codec = codec_for(&self.protocol)
            .map_err(|e| BasilError::Configuration(e.to_string()))?;
        debug!(addr = %self.addr, protocol = codec.name(), "Building connection");

        let stream_config = StreamConfig::new(self.addr.clone()).with_max_frame_size(self.max_frame_size);
        let transport = StreamTransport::connect(self.addr.clone(), stream_config);
        let connection = BasilConnection::new(Protocol::new(Arc::new(transport), codec), self.config);
        connection.start().await?;

        info!(addr = %self.addr, protocol = connection.protocol().name(), "Connected");
        Ok(connection)
    }
}
