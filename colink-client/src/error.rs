//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] colink_protocol::ProtocolError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connect timeout")]
    ConnectTimeout,

    #[error("request timeout")]
    Timeout,

    #[error("unexpected reply with tag {tag}")]
    UnexpectedReply { tag: u32 },

    #[error("client is shut down")]
    Shutdown,

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl ClientError {
    /// Returns whether a new connection attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::ConnectionClosed
                | ClientError::ConnectTimeout
                | ClientError::Timeout
                | ClientError::TlsHandshake(_)
        )
    }
}
