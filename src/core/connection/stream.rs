// src/core/connection/stream.rs

//! Unifies plain TCP and TLS-wrapped sockets behind one stream type and
//! handles socket-level setup: connect timeout, nodelay, OS keepalive.

use crate::config::ConnectionConfig;
use crate::core::ClientError;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tracing::warn;

/// The transport under a connection: raw TCP, or TCP wrapped in TLS.
#[derive(Debug)]
pub enum RespStream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl RespStream {
    /// Establishes the socket for `config`: TCP connect bounded by the
    /// configured timeout, nodelay, optional keepalive, optional TLS wrap.
    pub async fn establish(config: &ConnectionConfig) -> Result<Self, ClientError> {
        let addr = config.addr();
        let stream = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                ClientError::Io(std::sync::Arc::new(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {addr} timed out"),
                )))
            })??;
        stream.set_nodelay(true)?;

        if config.keepalive.enabled {
            apply_keepalive(&stream, &addr, Duration::from_secs(config.keepalive.delay_secs));
        }

        match &config.tls {
            None => Ok(RespStream::Tcp(stream)),
            Some(tls) => {
                let server_name =
                    ServerName::try_from(tls.server_name.clone()).map_err(|err| {
                        ClientError::InvalidSocket(format!(
                            "invalid TLS server name '{}': {err}",
                            tls.server_name
                        ))
                    })?;
                let connector = TlsConnector::from(tls.config.clone());
                let wrapped = connector.connect(server_name, stream).await?;
                Ok(RespStream::Tls(Box::new(wrapped)))
            }
        }
    }
}

#[cfg(any(unix, windows))]
fn apply_keepalive(stream: &TcpStream, addr: &str, delay: Duration) {
    use socket2::{SockRef, TcpKeepalive};
    let keepalive = TcpKeepalive::new().with_time(delay).with_interval(delay);
    if let Err(err) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        warn!(node = %addr, error = %err, "failed to set TCP keepalive");
    }
}

#[cfg(not(any(unix, windows)))]
fn apply_keepalive(_stream: &TcpStream, addr: &str, _delay: Duration) {
    warn!(node = %addr, "TCP keepalive is not supported on this platform");
}

impl AsyncRead for RespStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            RespStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            RespStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for RespStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            RespStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            RespStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            RespStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            RespStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            RespStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            RespStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
