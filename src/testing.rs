//! 测试辅助工具模块
//! Test utilities module

#![cfg(test)]

use crate::{
    config::{Config, ManagerConfig},
    error::{Error, Result},
    manager::ConnectionManager,
    status::{ConnectionState, StatusSnapshot},
    transport::Connector,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{DuplexStream, duplex};
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;

pub const TEST_HOST: &str = "10.0.0.5";
pub const TEST_PORT: u16 = 55503;

/// What the next connect attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Hand out one end of an in-memory pipe; the other end goes to the test.
    Accept,
    /// Fail with "connection refused".
    Refuse,
    /// Never complete.
    Hang,
}

/// A connect attempt as seen by the mock.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub at: Instant,
    pub host: String,
    pub port: u16,
}

/// A connector that follows a script. Once the script runs out every attempt
/// gets `fallback`.
#[derive(Clone)]
pub struct MockConnector {
    script: Arc<Mutex<VecDeque<Outcome>>>,
    fallback: Outcome,
    attempts: Arc<Mutex<Vec<Attempt>>>,
    peers: mpsc::UnboundedSender<DuplexStream>,
}

impl MockConnector {
    pub fn new(
        script: impl IntoIterator<Item = Outcome>,
        fallback: Outcome,
    ) -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            fallback,
            attempts: Arc::new(Mutex::new(Vec::new())),
            peers,
        };
        (connector, peers_rx)
    }

    pub async fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().await.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Stream = DuplexStream;

    async fn connect(&self, host: &str, port: u16) -> Result<DuplexStream> {
        self.attempts.lock().await.push(Attempt {
            at: Instant::now(),
            host: host.to_string(),
            port,
        });
        let outcome = self.script.lock().await.pop_front().unwrap_or(self.fallback);
        match outcome {
            Outcome::Accept => {
                let (local, peer) = duplex(4096);
                let _ = self.peers.send(peer);
                Ok(local)
            }
            Outcome::Refuse => Err(Error::Connect {
                addr: format!("{host}:{port}"),
                source: std::io::ErrorKind::ConnectionRefused.into(),
            }),
            Outcome::Hang => std::future::pending().await,
        }
    }
}

/// A harness for testing a `ConnectionManager` against a `MockConnector`.
///
/// Every published snapshot is forwarded to `statuses`; every accepted
/// connection's far end is forwarded to `peers`.
pub struct TestHarness {
    pub manager: ConnectionManager,
    pub connector: MockConnector,
    pub statuses: mpsc::UnboundedReceiver<StatusSnapshot>,
    pub peers: mpsc::UnboundedReceiver<DuplexStream>,
}

impl TestHarness {
    pub fn new(script: impl IntoIterator<Item = Outcome>, fallback: Outcome) -> Self {
        let (connector, peers) = MockConnector::new(script, fallback);
        let manager = ConnectionManager::with_connector(ManagerConfig::default(), connector.clone());

        let (status_tx, statuses) = mpsc::unbounded_channel();
        manager.on_status_change(move |snapshot| {
            let _ = status_tx.send(snapshot.clone());
        });

        Self {
            manager,
            connector,
            statuses,
            peers,
        }
    }

    pub fn config() -> Config {
        Config::new(TEST_HOST, TEST_PORT)
    }

    /// Waits for the next published snapshot.
    #[allow(clippy::expect_used)]
    pub async fn next_status(&mut self) -> StatusSnapshot {
        self.statuses
            .recv()
            .await
            .expect("status channel closed")
    }

    /// Waits for the next snapshot and checks its state.
    pub async fn expect_state(&mut self, state: ConnectionState) -> StatusSnapshot {
        let snapshot = self.next_status().await;
        assert_eq!(snapshot.state, state, "unexpected snapshot: {snapshot:?}");
        snapshot
    }

    /// Takes the far end of the most recently accepted connection.
    #[allow(clippy::expect_used)]
    pub async fn next_peer(&mut self) -> DuplexStream {
        self.peers
            .recv()
            .await
            .expect("peer channel closed")
    }

    /// Returns every snapshot published so far without waiting.
    pub fn drain_statuses(&mut self) -> Vec<StatusSnapshot> {
        let mut drained = Vec::new();
        while let Ok(snapshot) = self.statuses.try_recv() {
            drained.push(snapshot);
        }
        drained
    }
}
