//! 连接状态与对外发布的状态快照。
//! Connection state and the status snapshot published to the host.
//!
//! Every transition of the connection manager produces a [`StatusSnapshot`].
//! The host maps it onto its own status display and onto a flat set of named
//! string variables (see [`StatusSnapshot::variables`]).
//!
//! 连接管理器的每次状态转换都会产生一个 [`StatusSnapshot`]。

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Variable holding the [`ConnectionStatus`] string.
pub const VAR_CONNECTION_STATUS: &str = "connection_status";
/// Variable holding the configured host.
pub const VAR_TARGET_IP: &str = "target_ip";
/// Variable holding the configured port.
pub const VAR_TARGET_PORT: &str = "target_port";
/// Variable holding the consecutive failure count as a decimal string.
pub const VAR_CONNECTION_FAILURES: &str = "connection_failures";

/// Variable ids and their display names, in the order the host lists them.
/// 变量ID及其显示名称。
pub const VARIABLE_DEFINITIONS: [(&str, &str); 4] = [
    (VAR_CONNECTION_STATUS, "Connection Status"),
    (VAR_TARGET_PORT, "Target Port"),
    (VAR_TARGET_IP, "Target IP Address"),
    (VAR_CONNECTION_FAILURES, "Connection Failures"),
];

/// The state of the managed connection.
/// 受管连接的状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No usable host is configured. No socket exists.
    /// 未配置可用主机，不存在套接字。
    #[default]
    Unconfigured,
    /// A connect attempt is in flight.
    /// 连接尝试正在进行中。
    Connecting,
    /// The socket is established and accepts writes.
    /// 套接字已建立，可以写入。
    Connected,
    /// The peer closed the connection. A retry is pending.
    /// 对端关闭了连接，重试待定。
    Disconnected,
    /// Connecting failed or the connection broke. A retry is pending.
    /// 连接失败或连接中断，重试待定。
    Errored,
}

impl ConnectionState {
    /// Returns the name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfigured => "Unconfigured",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
            Self::Errored => "Errored",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The value of the `connection_status` variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Nothing has been configured yet.
    Unknown,
    /// A configuration was applied but it has no host.
    BadConfig,
    Connecting,
    Connected,
    /// Covers both a graceful close and an error.
    Disconnected,
}

impl ConnectionStatus {
    /// Derives the variable value for `state`. `configured` tells an initial
    /// manager apart from one that received an unusable configuration.
    pub fn for_state(state: ConnectionState, configured: bool) -> Self {
        match state {
            ConnectionState::Unconfigured if configured => Self::BadConfig,
            ConnectionState::Unconfigured => Self::Unknown,
            ConnectionState::Connecting => Self::Connecting,
            ConnectionState::Connected => Self::Connected,
            ConnectionState::Disconnected | ConnectionState::Errored => Self::Disconnected,
        }
    }

    /// Returns the string published in the `connection_status` variable.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::BadConfig => "bad_config",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The externally observable summary of the connection.
///
/// Recomputed and published on every transition; never stored as a source of
/// truth.
///
/// 连接的对外可观察摘要。在每次转换时重新计算并发布。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Current state of the state machine.
    /// 状态机的当前状态。
    pub state: ConnectionState,
    /// Value of the `connection_status` variable.
    pub status: ConnectionStatus,
    /// Configured host, empty when unconfigured.
    pub target_host: String,
    /// Configured port, `None` when unconfigured.
    pub target_port: Option<u16>,
    /// Failures since the last successful connect.
    /// 自上次成功连接以来的失败次数。
    pub consecutive_failures: u32,
    /// Delay the next reconnect will use.
    /// 下一次重连将使用的延迟。
    pub retry_interval: Duration,
    /// Free-text detail for the host's status display.
    pub message: Option<String>,
}

impl StatusSnapshot {
    /// The snapshot of a manager that has not been configured yet.
    pub fn initial(retry_interval: Duration) -> Self {
        Self {
            state: ConnectionState::Unconfigured,
            status: ConnectionStatus::Unknown,
            target_host: String::new(),
            target_port: None,
            consecutive_failures: 0,
            retry_interval,
            message: None,
        }
    }

    /// Returns true if the snapshot was taken while connected.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Flattens the snapshot into the host's named string variables.
    ///
    /// 将快照展开为宿主的命名字符串变量。
    pub fn variables(&self) -> BTreeMap<&'static str, String> {
        let mut vars = BTreeMap::new();
        vars.insert(VAR_CONNECTION_STATUS, self.status.as_str().to_string());
        vars.insert(VAR_TARGET_IP, self.target_host.clone());
        vars.insert(
            VAR_TARGET_PORT,
            self.target_port.map(|p| p.to_string()).unwrap_or_default(),
        );
        vars.insert(
            VAR_CONNECTION_FAILURES,
            self.consecutive_failures.to_string(),
        );
        vars
    }
}

/// An observer invoked synchronously on every transition.
/// 在每次转换时同步调用的观察者。
pub type StatusListener = Box<dyn Fn(&StatusSnapshot) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(state: ConnectionState, configured: bool) -> StatusSnapshot {
        StatusSnapshot {
            state,
            status: ConnectionStatus::for_state(state, configured),
            target_host: "10.0.0.5".to_string(),
            target_port: Some(55503),
            consecutive_failures: 2,
            retry_interval: Duration::from_secs(5),
            message: None,
        }
    }

    #[test]
    fn test_status_mapping() {
        use ConnectionState::*;
        assert_eq!(ConnectionStatus::for_state(Unconfigured, false).as_str(), "unknown");
        assert_eq!(ConnectionStatus::for_state(Unconfigured, true).as_str(), "bad_config");
        assert_eq!(ConnectionStatus::for_state(Connecting, true).as_str(), "connecting");
        assert_eq!(ConnectionStatus::for_state(Connected, true).as_str(), "connected");
        assert_eq!(ConnectionStatus::for_state(Disconnected, true).as_str(), "disconnected");
        assert_eq!(ConnectionStatus::for_state(Errored, true).as_str(), "disconnected");
        assert_eq!(Errored.to_string(), "Errored");
        assert_eq!(ConnectionStatus::BadConfig.to_string(), "bad_config");
    }

    #[test]
    fn test_variables() {
        let vars = snapshot(ConnectionState::Errored, true).variables();
        assert_eq!(vars.len(), VARIABLE_DEFINITIONS.len());
        assert_eq!(vars[VAR_CONNECTION_STATUS], "disconnected");
        assert_eq!(vars[VAR_TARGET_IP], "10.0.0.5");
        assert_eq!(vars[VAR_TARGET_PORT], "55503");
        assert_eq!(vars[VAR_CONNECTION_FAILURES], "2");
    }

    #[test]
    fn test_initial_snapshot_variables() {
        let vars = StatusSnapshot::initial(Duration::from_secs(5)).variables();
        assert_eq!(vars[VAR_CONNECTION_STATUS], "unknown");
        assert_eq!(vars[VAR_TARGET_IP], "");
        assert_eq!(vars[VAR_TARGET_PORT], "");
        assert_eq!(vars[VAR_CONNECTION_FAILURES], "0");
    }
}
