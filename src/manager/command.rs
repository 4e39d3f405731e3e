//! Commands and events consumed by the manager actor.

use crate::{
    config::Config,
    error::{Error, Result},
    status::StatusListener,
};
use bytes::Bytes;
use tokio::sync::oneshot;

/// Commands sent from a [`ConnectionManager`](super::ConnectionManager) handle
/// to the actor.
///
/// 从 `ConnectionManager` 句柄发送到 actor 的命令。
pub(crate) enum ManagerCommand {
    /// Replace the configuration and restart the connection.
    /// 替换配置并重启连接。
    Configure {
        config: Config,
        response_tx: oneshot::Sender<Result<()>>,
    },
    /// Write one line if connected.
    /// 如果已连接，则写入一行。
    Send {
        payload: Bytes,
        response_tx: oneshot::Sender<bool>,
    },
    /// Register a status observer.
    /// 注册状态观察者。
    Subscribe { listener: StatusListener },
    /// Read back the active configuration.
    GetConfig {
        response_tx: oneshot::Sender<Option<Config>>,
    },
    /// Tear everything down and stop the actor.
    /// 拆除一切并停止 actor。
    Shutdown { response_tx: oneshot::Sender<()> },
}

/// The result of a connect task, tagged with the attempt that spawned it.
pub(crate) struct ConnectOutcome<S> {
    pub(crate) attempt: u64,
    pub(crate) result: Result<S>,
}

/// Events reported by the read and write tasks of a live session.
///
/// 活动会话的读写任务上报的事件。
#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// The peer closed the stream.
    Closed { session: u64 },
    /// Reading or writing failed.
    Failed { session: u64, error: Error },
}

impl SessionEvent {
    pub(crate) fn session(&self) -> u64 {
        match self {
            SessionEvent::Closed { session } | SessionEvent::Failed { session, .. } => *session,
        }
    }
}
