//! Byte-stream transports and the connector seam.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;

use crate::error::Result;

/// Read and write halves of an established connection.
pub struct Transport {
    pub reader: Box<dyn AsyncBufRead + Unpin + Send>,
    pub writer: Box<dyn AsyncWrite + Unpin + Send>,
}

impl Transport {
    /// Split any bidirectional stream (TCP socket, in-memory duplex).
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(BufReader::new(reader)),
            writer: Box::new(writer),
        }
    }
}

pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = Result<Transport>> + Send + 'a>>;

/// Opens transports to a server. Called again on every reconnect.
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> ConnectFuture<'a>;
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Plain TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> ConnectFuture<'a> {
        Box::pin(connect_tcp(host, port))
    }
}

async fn connect_tcp(host: &str, port: u16) -> Result<Transport> {
    tracing::debug!("Resolving {host}:{port}...");
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, format!("connect to {host}:{port} timed out")))??;
    stream.set_nodelay(true)?;
    tracing::debug!("TCP connected to {host}:{port}");
    Ok(Transport::from_stream(stream))
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::codec::LineReader;

    #[tokio::test]
    async fn tcp_connector_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b":srv NOTICE * :hello\r\n").await.unwrap();
            let mut buf = [0u8; 9];
            sock.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut transport = TcpConnector.connect("127.0.0.1", port).await.unwrap();
        transport.writer.write_all(b"NICK bot\r\n").await.unwrap();
        let mut reader = LineReader::new(transport.reader);
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("srv NOTICE * :hello"));
        assert_eq!(&server.await.unwrap(), b"NICK bot\r");
    }
}
