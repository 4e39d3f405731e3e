//! 单个已建立连接的读写任务。
//! The read and write tasks of one established connection.
//!
//! A [`Session`] owns the live socket through two helper tasks. Dropping it
//! releases the socket: the reader is aborted and the writer half is shut down
//! gracefully once its queue closes.
//!
//! [`Session`] 通过两个辅助任务拥有活动套接字。丢弃它即释放套接字。

use super::command::SessionEvent;
use crate::{config::SocketConfig, error::Error};
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Upper bound for the graceful shutdown of the write half.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// A live connection. At most one exists per manager.
///
/// 一个活动连接。每个管理器最多存在一个。
pub(crate) struct Session {
    id: u64,
    outbound: mpsc::UnboundedSender<Bytes>,
    reader: JoinHandle<()>,
}

impl Session {
    /// Splits `stream` and spawns its read and write tasks.
    pub(crate) fn start<S>(
        id: u64,
        stream: S,
        socket: &SocketConfig,
        verbose: bool,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(
            id,
            write_half,
            outbound_rx,
            socket.write_timeout,
            events.clone(),
        ));
        let reader = tokio::spawn(read_loop(
            id,
            read_half,
            socket.read_buffer_size,
            verbose,
            events,
        ));

        Self {
            id,
            outbound,
            reader,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Queues a line for the write task. Never waits for the socket.
    pub(crate) fn write(&self, line: Bytes) -> bool {
        self.outbound.send(line).is_ok()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // The outbound sender is dropped with `self`, which lets the write
        // task shut its half down.
        self.reader.abort();
        trace!(session = self.id, "Session released");
    }
}

async fn write_loop<W>(
    session: u64,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    write_timeout: Duration,
    events: mpsc::UnboundedSender<SessionEvent>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = outbound.recv().await {
        let written = timeout(write_timeout, async {
            writer.write_all(&line).await?;
            writer.flush().await
        })
        .await;
        let error = match written {
            Ok(Ok(())) => {
                trace!(session, bytes = line.len(), "Line written");
                continue;
            }
            Ok(Err(e)) => Error::Io(e),
            Err(_) => Error::WriteTimeout,
        };
        let _ = events.send(SessionEvent::Failed { session, error });
        return;
    }

    // Close errors are irrelevant: the session is already gone.
    match timeout(CLOSE_TIMEOUT, writer.shutdown()).await {
        Ok(Ok(())) => trace!(session, "Write half shut down"),
        Ok(Err(e)) => trace!(session, "Ignoring error while closing: {}", e),
        Err(_) => trace!(session, "Timed out while closing"),
    }
}

async fn read_loop<R>(
    session: u64,
    mut reader: R,
    buffer_size: usize,
    verbose: bool,
    events: mpsc::UnboundedSender<SessionEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; buffer_size.max(1)];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => {
                let _ = events.send(SessionEvent::Closed { session });
                return;
            }
            Ok(n) => {
                let received = String::from_utf8_lossy(&buffer[..n]);
                if verbose {
                    debug!(session, "Received raw data: {}", received);
                } else {
                    trace!(session, bytes = n, "Received raw data: {}", received);
                }
            }
            Err(e) => {
                let _ = events.send(SessionEvent::Failed {
                    session,
                    error: Error::Io(e),
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn socket_config() -> SocketConfig {
        SocketConfig {
            write_timeout: Duration::from_millis(200),
            ..SocketConfig::default()
        }
    }

    #[tokio::test]
    async fn test_write_reaches_peer() {
        let (local, mut peer) = duplex(64);
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let session = Session::start(1, local, &socket_config(), false, events_tx);

        assert!(session.write(Bytes::from_static(b"hello\n")));
        let mut buf = [0u8; 6];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello\n");
    }

    #[tokio::test]
    async fn test_peer_close_reports_closed() {
        let (local, peer) = duplex(64);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let _session = Session::start(7, local, &socket_config(), true, events_tx);

        drop(peer);
        let event = events_rx.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::Closed { session: 7 }));
    }

    #[tokio::test]
    async fn test_drop_closes_peer() {
        let (local, mut peer) = duplex(64);
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let session = Session::start(3, local, &socket_config(), false, events_tx);

        drop(session);
        let mut buf = [0u8; 8];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "peer should see end-of-file after the session is dropped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_write_times_out() {
        // The peer never reads, so the duplex buffer fills up.
        let (local, _peer) = duplex(4);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let session = Session::start(9, local, &socket_config(), false, events_tx);

        assert!(session.write(Bytes::from_static(b"more than four bytes\n")));
        let event = events_rx.recv().await.unwrap();
        assert!(matches!(
            event,
            SessionEvent::Failed {
                session: 9,
                error: Error::WriteTimeout
            }
        ));
    }
}
