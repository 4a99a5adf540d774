//! Byte transports: TCP, TLS over TCP, Unix socket

use super::tls::{parse_server_name, TlsConfig};
use crate::{Error, Result};
use bytes::BytesMut;
use rustls_pki_types::ServerName;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Stream for S {}

/// An open byte stream to the cache server
///
/// `read_buf` is cancel-safe: the driver task races it against incoming
/// commands while the connection is idle.
pub enum Transport {
    /// Plain TCP
    Tcp(TcpStream),
    /// TLS over TCP (`rediss://`)
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

impl Transport {
    /// Connect via plain TCP
    pub async fn connect_tcp(host: &str, port: u16) -> Result<Self> {
        Ok(Transport::Tcp(open_tcp(host, port).await?))
    }

    /// Connect via TCP and run the TLS handshake immediately
    pub async fn connect_tcp_tls(host: &str, port: u16, tls_config: &TlsConfig) -> Result<Self> {
        let server_name = ServerName::try_from(parse_server_name(host)?)
            .map_err(|_| Error::Config(format!("invalid hostname for TLS: {}", host)))?;

        let tcp = open_tcp(host, port).await?;
        let stream = TlsConnector::from(tls_config.client_config())
            .connect(server_name, tcp)
            .await
            .map_err(|e| {
                tracing::debug!(host, port, error = %e, "TLS handshake failed");
                Error::from(e)
            })?;

        tracing::debug!(host, port, "TLS session established");
        Ok(Transport::Tls(Box::new(stream)))
    }

    /// Connect via Unix socket
    pub async fn connect_unix(path: &Path) -> Result<Self> {
        Ok(Transport::Unix(UnixStream::connect(path).await?))
    }

    fn stream(&mut self) -> &mut dyn Stream {
        match self {
            Transport::Tcp(stream) => stream,
            Transport::Tls(stream) => stream.as_mut(),
            Transport::Unix(stream) => stream,
        }
    }

    /// Write the whole buffer
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        Ok(self.stream().write_all(buf).await?)
    }

    /// Flush buffered writes (TLS records in particular)
    pub async fn flush(&mut self) -> Result<()> {
        Ok(self.stream().flush().await?)
    }

    /// Read whatever is available into `buf`; `Ok(0)` means the peer closed
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        Ok(self.stream().read_buf(buf).await?)
    }

    /// Close the write half
    pub async fn shutdown(&mut self) -> Result<()> {
        Ok(self.stream().shutdown().await?)
    }

    /// Whether the stream is TLS-encrypted
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }
}

async fn open_tcp(host: &str, port: u16) -> Result<TcpStream> {
    let stream = TcpStream::connect((host, port)).await?;
    // Commands are small request/reply pairs
    stream.set_nodelay(true)?;
    Ok(stream)
}
