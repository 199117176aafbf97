//! Byte streams a connection can run over

use super::tls::{parse_server_name, TlsConfig};
use crate::{Error, Result};
use bytes::BytesMut;
use sha2::Digest;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::client::TlsStream;

/// Socket under a [`Connection`](super::Connection)
///
/// A TCP socket starts out `Tcp` and becomes `Tls` when the server accepts
/// an SSLRequest. Unix sockets never carry TLS.
pub enum Transport {
    /// Unencrypted TCP
    Tcp(TcpStream),
    /// TCP after a successful TLS handshake
    Tls(Box<TlsStream<TcpStream>>),
    /// Unix domain socket
    Unix(UnixStream),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Transport::Tcp(_) => "tcp",
            Transport::Tls(_) => "tls",
            Transport::Unix(_) => "unix",
        };
        f.debug_tuple("Transport").field(&kind).finish()
    }
}

/// Run the same expression against whichever stream is inside
macro_rules! with_stream {
    ($transport:expr, $s:ident => $body:expr) => {
        match $transport {
            Transport::Tcp($s) => $body,
            Transport::Tls($s) => $body,
            Transport::Unix($s) => $body,
        }
    };
}

impl Transport {
    /// Open a TCP connection with Nagle disabled
    pub async fn connect_tcp(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Transport::Tcp(stream))
    }

    /// Open `<dir>/.s.PGSQL.<port>`
    pub async fn connect_unix(path: &Path) -> Result<Self> {
        Ok(Transport::Unix(UnixStream::connect(path).await?))
    }

    pub(crate) async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        with_stream!(self, s => s.write_all(buf).await?);
        Ok(())
    }

    pub(crate) async fn flush(&mut self) -> Result<()> {
        with_stream!(self, s => s.flush().await?);
        Ok(())
    }

    pub(crate) async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        Ok(with_stream!(self, s => s.read_buf(buf).await?))
    }

    pub(crate) async fn shutdown(&mut self) -> Result<()> {
        with_stream!(self, s => s.shutdown().await?);
        Ok(())
    }

    /// Run the TLS handshake over a plain TCP socket
    ///
    /// Call only after the server answered the SSLRequest with `S`.
    pub async fn upgrade_to_tls(self, tls_config: &TlsConfig, hostname: &str) -> Result<Self> {
        let tcp = match self {
            Transport::Tcp(tcp) => tcp,
            Transport::Tls(_) => {
                return Err(Error::Config("transport is already TLS-encrypted".into()))
            }
            Transport::Unix(_) => {
                return Err(Error::Config("cannot upgrade Unix socket to TLS".into()))
            }
        };

        let server_name = parse_server_name(hostname)?;
        let stream = tokio_rustls::TlsConnector::from(tls_config.client_config())
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::Config(format!("TLS handshake failed: {}", e)))?;

        Ok(Transport::Tls(Box::new(stream)))
    }

    /// Whether the stream is TLS-encrypted
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// `tls-server-end-point` binding: SHA-256 of the server's leaf
    /// certificate, or `None` without TLS
    pub fn channel_binding_data(&self) -> Option<Vec<u8>> {
        let Transport::Tls(stream) = self else {
            return None;
        };
        let (_, session) = stream.get_ref();
        let leaf = session.peer_certificates()?.first()?;
        Some(sha2::Sha256::digest(leaf.as_ref()).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_connect_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = Transport::connect_tcp("127.0.0.1", port).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_plain_tcp_has_no_channel_binding() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let transport = Transport::connect_tcp("127.0.0.1", port).await.unwrap();
        assert!(!transport.is_tls());
        assert!(transport.channel_binding_data().is_none());
        assert_eq!(format!("{:?}", transport), "Transport(\"tcp\")");
    }

    #[tokio::test]
    async fn test_unix_round_trip() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut left = Transport::Unix(a);
        let mut right = Transport::Unix(b);

        left.write_all(b"ping").await.unwrap();
        left.flush().await.unwrap();

        let mut buf = BytesMut::new();
        while buf.len() < 4 {
            right.read_buf(&mut buf).await.unwrap();
        }
        assert_eq!(&buf[..], b"ping");
    }

    #[tokio::test]
    async fn test_unix_socket_cannot_upgrade_to_tls() {
        let (a, _b) = UnixStream::pair().unwrap();
        let tls = TlsConfig::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap();

        let err = Transport::Unix(a)
            .upgrade_to_tls(&tls, "localhost")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("Unix socket")));
    }
}
