//! tests/common/harness.rs
use photon_link::{
    Config, ConnectionManager, ConnectionState, ManagerConfig, RetryPolicy, StatusSnapshot,
};
use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing_subscriber::fmt::format::FmtSpan;

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

pub const BASE_INTERVAL: Duration = Duration::from_millis(50);
pub const SLOW_INTERVAL: Duration = Duration::from_millis(100);

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "photon_link=debug,lifecycle=info".to_string());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_test_writer()
            .init();
    });
}

/// Manager settings with the reconnect pacing scaled down for tests.
pub fn fast_settings() -> ManagerConfig {
    ManagerConfig::default().retry_policy(RetryPolicy {
        base_interval: BASE_INTERVAL,
        slow_interval: SLOW_INTERVAL,
        failure_threshold: 3,
    })
}

/// Returns a loopback port nothing listens on.
pub fn refused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// A loopback "device" plus a manager pointed at nothing yet.
pub struct TestHarness {
    pub device_addr: SocketAddr,
    pub device: TcpListener,
    pub manager: ConnectionManager,
    statuses: mpsc::UnboundedReceiver<StatusSnapshot>,
}

impl TestHarness {
    pub async fn new() -> Self {
        init_tracing();
        let device = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let device_addr = device.local_addr().unwrap();

        let manager = ConnectionManager::new(fast_settings());
        let (status_tx, statuses) = mpsc::unbounded_channel();
        manager.on_status_change(move |snapshot| {
            let _ = status_tx.send(snapshot.clone());
        });

        Self {
            device_addr,
            device,
            manager,
            statuses,
        }
    }

    /// A configuration pointing at the loopback device.
    pub fn device_config(&self) -> Config {
        Config::new(self.device_addr.ip().to_string(), self.device_addr.port()).verbose(true)
    }

    /// Accepts the manager's next connection on the device side.
    pub async fn accept(&self) -> TcpStream {
        let (stream, _) = timeout(WAIT, self.device.accept())
            .await
            .expect("no connection from the manager")
            .unwrap();
        stream
    }

    /// Skips published snapshots until one matches `predicate`.
    pub async fn wait_for(
        &mut self,
        predicate: impl Fn(&StatusSnapshot) -> bool,
    ) -> StatusSnapshot {
        timeout(WAIT, async {
            loop {
                let snapshot = self.statuses.recv().await.expect("status channel closed");
                if predicate(&snapshot) {
                    return snapshot;
                }
            }
        })
        .await
        .expect("timed out waiting for status")
    }

    pub async fn wait_for_state(&mut self, state: ConnectionState) -> StatusSnapshot {
        self.wait_for(|s| s.state == state).await
    }
}
