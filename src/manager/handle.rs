//! The user-facing handle to the connection manager actor.

use super::{actor::ManagerActor, command::ManagerCommand};
use crate::{
    config::{Config, ManagerConfig},
    error::{Error, Result},
    status::StatusSnapshot,
    transport::{Connector, TcpConnector},
};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

/// A handle to a connection manager.
///
/// The manager keeps one TCP connection to the configured device alive,
/// reconnecting with backoff whenever it fails, and publishes a
/// [`StatusSnapshot`] on every state transition. Handles are cheap to clone;
/// the manager tears itself down when [`shutdown`](Self::shutdown) is called
/// or when the last handle is dropped.
///
/// 连接管理器的句柄。
///
/// 管理器保持到已配置设备的一个TCP连接，失败时按退避策略重连，并在每次状态转换时
/// 发布 [`StatusSnapshot`]。句柄可以廉价克隆；调用 `shutdown` 或丢弃最后一个句柄时
/// 管理器会自行拆除。
///
/// # Example
///
/// ```no_run
/// use photon_link::{Config, ConnectionManager, ManagerConfig};
///
/// # async fn run() -> photon_link::Result<()> {
/// let manager = ConnectionManager::new(ManagerConfig::default());
/// manager.on_status_change(|status| {
///     println!("{} ({} failures)", status.state, status.consecutive_failures);
/// });
/// manager.configure(Config::new("10.0.0.5", 55503)).await?;
///
/// if !manager.send("<photon> CUE_EXEC_ID 12 </photon>").await {
///     println!("not connected yet");
/// }
/// manager.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    command_tx: mpsc::UnboundedSender<ManagerCommand>,
    status_rx: watch::Receiver<StatusSnapshot>,
}

impl ConnectionManager {
    /// Creates a manager that connects over TCP.
    ///
    /// Must be called from within a Tokio runtime. The manager starts
    /// unconfigured; call [`configure`](Self::configure) to connect.
    ///
    /// 创建一个通过TCP连接的管理器。必须在 Tokio 运行时中调用。
    pub fn new(settings: ManagerConfig) -> Self {
        let connector = TcpConnector::new(settings.socket.clone());
        Self::with_connector(settings, connector)
    }

    /// Creates a manager that opens its streams through `connector`.
    ///
    /// 创建一个通过 `connector` 打开流的管理器。
    pub fn with_connector<C: Connector>(settings: ManagerConfig, connector: C) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) =
            watch::channel(StatusSnapshot::initial(settings.retry.base_interval));

        let mut actor = ManagerActor::new(settings, connector, command_rx, status_tx);
        tokio::spawn(async move {
            actor.run().await;
        });
        info!("Connection manager created and running");

        Self {
            command_tx,
            status_rx,
        }
    }

    /// Applies a new configuration, tearing down any existing connection.
    ///
    /// Returns [`Error::Configuration`] if the host is empty; the manager then
    /// stays unconfigured until a usable configuration arrives. Either way a
    /// status snapshot has been published when this returns.
    ///
    /// 应用新配置，拆除任何现有连接。主机为空时返回 [`Error::Configuration`]。
    pub async fn configure(&self, config: Config) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(ManagerCommand::Configure {
                config,
                response_tx,
            })
            .map_err(|_| Error::Shutdown)?;
        response_rx.await.map_err(|_| Error::Shutdown)?
    }

    /// Sends one line to the device.
    ///
    /// The line terminator is appended. Returns false without sending anything
    /// unless the manager is connected. A true result means the line was handed
    /// to the socket writer; there is no acknowledgment from the device.
    ///
    /// 向设备发送一行。仅在已连接时发送，否则返回 false。
    pub async fn send(&self, payload: impl Into<Bytes>) -> bool {
        let (response_tx, response_rx) = oneshot::channel();
        let command = ManagerCommand::Send {
            payload: payload.into(),
            response_tx,
        };
        if self.command_tx.send(command).is_err() {
            return false;
        }
        response_rx.await.unwrap_or(false)
    }

    /// Registers an observer invoked on every transition, on the manager's
    /// task, with the new snapshot. The observer must not block.
    ///
    /// 注册一个观察者，在每次转换时于管理器任务中被调用。
    pub fn on_status_change<F>(&self, handler: F)
    where
        F: Fn(&StatusSnapshot) + Send + Sync + 'static,
    {
        let command = ManagerCommand::Subscribe {
            listener: Box::new(handler),
        };
        if self.command_tx.send(command).is_err() {
            debug!("Status observer not registered: manager is shut down");
        }
    }

    /// Returns the most recently published snapshot.
    ///
    /// Shutdown publishes nothing, so after [`shutdown`](Self::shutdown) this
    /// keeps returning the last snapshot taken while running, possibly
    /// `Connected`. Check [`is_shut_down`](Self::is_shut_down) first.
    ///
    /// 返回最近发布的快照。关闭后仍保留关闭前的最后一个快照。
    pub fn status(&self) -> StatusSnapshot {
        self.status_rx.borrow().clone()
    }

    /// Returns a receiver that always holds the latest snapshot. The
    /// receiver reports a closed channel once the manager has stopped.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_rx.clone()
    }

    /// Returns the active configuration, if one was applied.
    pub async fn config(&self) -> Option<Config> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(ManagerCommand::GetConfig { response_tx })
            .ok()?;
        response_rx.await.ok().flatten()
    }

    /// Closes the connection and cancels any pending reconnect.
    ///
    /// Idempotent: calling it again, from any clone, does nothing.
    ///
    /// 关闭连接并取消任何待处理的重连。幂等。
    pub async fn shutdown(&self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .command_tx
            .send(ManagerCommand::Shutdown { response_tx })
            .is_err()
        {
            debug!("Connection manager already shut down");
            return;
        }
        let _ = response_rx.await;
    }

    /// Returns true once the manager has stopped.
    pub fn is_shut_down(&self) -> bool {
        self.command_tx.is_closed()
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status_rx.borrow();
        f.debug_struct("ConnectionManager")
            .field("state", &status.state)
            .field("target_host", &status.target_host)
            .field("target_port", &status.target_port)
            .finish()
    }
}
