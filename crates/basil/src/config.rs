//! Connection configuration

use basil_proto::AuthToken;
use std::time::Duration;

/// Default time to wait for an RPC response
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-connection settings
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long an RPC waits for its response; `None` waits forever
    pub rpc_timeout: Option<Duration>,
    /// Token every inbound request must carry
    pub incoming_auth: Option<AuthToken>,
    /// Token attached to outbound messages that carry none
    pub outgoing_auth: Option<AuthToken>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Some(DEFAULT_RPC_TIMEOUT),
            incoming_auth: None,
            outgoing_auth: None,
        }
    }
}

impl ConnectionConfig {
    /// Set the RPC timeout
    pub fn with_rpc_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Require a token on inbound requests
    pub fn with_incoming_auth(mut self, token: impl Into<AuthToken>) -> Self {
        self.incoming_auth = Some(token.into());
        self
    }

    /// Attach a token to outbound messages
    pub fn with_outgoing_auth(mut self, token: impl Into<AuthToken>) -> Self {
        self.outgoing_auth = Some(token.into());
        self
    }
}
