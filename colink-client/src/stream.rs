//! Client stream: plain TCP or TLS over TCP.

use crate::connection::ConnectionConfig;
use crate::error::ClientError;
use crate::tls::create_tls_connector;
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;

pin_project! {
    /// A client stream that can be either plain TCP or TLS.
    #[project = ClientStreamProj]
    pub enum ClientStream {
        Plain { #[pin] stream: TcpStream },
        Tls { #[pin] stream: ClientTlsStream<TcpStream> },
    }
}

impl ClientStream {
    /// Resolves the configured host, connects and performs the TLS handshake
    /// when TLS is enabled.
    pub async fn open(config: &ConnectionConfig) -> Result<Self, ClientError> {
        let target = (config.host.as_str(), config.port);
        tracing::debug!("Connecting to {}:{}...", config.host, config.port);

        let tcp_stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(target))
            .await
            .map_err(|_| ClientError::ConnectTimeout)??;

        tcp_stream.set_nodelay(true).ok();

        let tls_config = match config.tls {
            Some(ref tls) if tls.enabled => tls,
            _ => {
                tracing::debug!("TCP connected (plain)");
                return Ok(ClientStream::Plain { stream: tcp_stream });
            }
        };

        let (connector, server_name) = create_tls_connector(tls_config, &config.host)?;

        tracing::debug!("Performing TLS handshake...");
        let tls_stream = tokio::time::timeout(
            config.connect_timeout,
            connector.connect(server_name, tcp_stream),
        )
        .await
        .map_err(|_| ClientError::ConnectTimeout)?
        .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;

        tracing::debug!("TLS handshake complete");
        Ok(ClientStream::Tls { stream: tls_stream })
    }

    /// Returns whether this stream is TLS-encrypted.
    pub fn is_tls(&self) -> bool {
        matches!(self, ClientStream::Tls { .. })
    }
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_read(cx, buf),
            ClientStreamProj::Tls { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_write(cx, buf),
            ClientStreamProj::Tls { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_flush(cx),
            ClientStreamProj::Tls { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_shutdown(cx),
            ClientStreamProj::Tls { stream } => stream.poll_shutdown(cx),
        }
    }
}
