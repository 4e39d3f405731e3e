//! Transport abstraction for reaching the remote device.
//!
//! The connection manager never opens sockets itself; it asks a [`Connector`]
//! for a byte stream. [`TcpConnector`] is the production implementation, tests
//! substitute an in-memory one.
//!
//! 到达远端设备的传输抽象。连接管理器本身不打开套接字，而是向 [`Connector`]
//! 请求字节流。

use crate::{
    config::SocketConfig,
    error::{Error, Result},
};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{trace, warn};

/// Opens byte streams to `host:port`.
///
/// 打开到 `host:port` 的字节流。
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The stream produced by a successful connect.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Opens a new stream. Errors are reported as [`Error::Connect`] or
    /// [`Error::ConnectTimeout`].
    ///
    /// 打开新的流。
    async fn connect(&self, host: &str, port: u16) -> Result<Self::Stream>;
}

/// Connects over plain TCP.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    socket: SocketConfig,
}

impl TcpConnector {
    pub fn new(socket: SocketConfig) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addr = format!("{host}:{port}");
        trace!(addr = %addr, "Opening TCP connection");

        let stream = match self.socket.connect_timeout {
            Some(limit) => match timeout(limit, TcpStream::connect(&addr)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(source)) => return Err(Error::Connect { addr, source }),
                Err(_) => return Err(Error::ConnectTimeout(addr)),
            },
            None => TcpStream::connect(&addr)
                .await
                .map_err(|source| Error::Connect {
                    addr: addr.clone(),
                    source,
                })?,
        };

        if let Err(e) = stream.set_nodelay(self.socket.no_delay) {
            warn!(addr = %addr, "Failed to set TCP_NODELAY: {}", e);
        }
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_connector_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let connector = TcpConnector::new(SocketConfig::default());
        let (client, accepted) =
            tokio::join!(connector.connect("127.0.0.1", port), listener.accept());
        let mut client = client.unwrap();
        let (mut server, _) = accepted.unwrap();

        client.write_all(b"ping\n").await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping\n");
        assert!(client.nodelay().unwrap());
    }

    #[tokio::test]
    async fn test_tcp_connector_refused() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let connector = TcpConnector::new(SocketConfig::default());
        let err = connector.connect("127.0.0.1", port).await.unwrap_err();
        assert!(err.is_connect_error(), "unexpected error: {err}");
    }
}
