//! 定义了目标设备配置和连接管理器的可调参数。
//! Defines the target device configuration and the tunable parameters of the
//! connection manager.

use crate::error::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// The port the remote device listens on when none is configured.
/// 未配置时远端设备监听的端口。
pub const DEFAULT_PORT: u16 = 55503;

/// The target the manager connects to, as delivered by the host.
///
/// A `Config` is an immutable snapshot: replacing it through
/// [`ConnectionManager::configure`](crate::manager::ConnectionManager::configure)
/// resets the connection.
///
/// 宿主提供的连接目标。`Config` 是不可变快照：通过 `configure` 替换它会重置连接。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IPv4 address of the remote device. An empty host leaves the manager unconfigured.
    /// 远端设备的IPv4地址。主机为空时管理器保持未配置状态。
    pub host: String,
    /// TCP port of the remote device.
    /// 远端设备的TCP端口。
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
    /// Enables lifecycle chatter in the log.
    /// 在日志中启用生命周期详细信息。
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            verbose: false,
        }
    }
}

impl Config {
    /// Creates a configuration for `host:port` with verbose logging off.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            verbose: false,
        }
    }

    /// Enables or disables verbose logging.
    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    /// Decodes a configuration document in the host's JSON shape
    /// (`{"host": "...", "port": 55503 | "55503", "verbose": false}`).
    ///
    /// 以宿主的JSON格式解码配置文档。
    pub fn from_json(document: &str) -> Result<Self> {
        Ok(serde_json::from_str(document)?)
    }

    /// Returns true if a host is set. This is the only precondition checked
    /// before a connection attempt.
    pub fn has_host(&self) -> bool {
        !self.host.trim().is_empty()
    }

    /// Get the address string (host:port).
    pub fn address(&self) -> String {
        format!("{}:{}", self.host.trim(), self.port)
    }
}

/// Accepts the port as a number or as a decimal string; an empty string or
/// `null` falls back to [`DEFAULT_PORT`].
fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    let raw = serde_json::Value::deserialize(deserializer)?;
    let port = match raw {
        serde_json::Value::Null => return Ok(DEFAULT_PORT),
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom(format!("invalid port {n}")))?,
        serde_json::Value::String(s) if s.trim().is_empty() => return Ok(DEFAULT_PORT),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| D::Error::custom(format!("invalid port {s:?}")))?,
        other => return Err(D::Error::custom(format!("invalid port {other}"))),
    };
    match u16::try_from(port) {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(D::Error::custom(format!("port {port} out of range 1-65535"))),
    }
}

/// Parses a port typed by a user (e.g. from an "update port" action).
pub fn parse_port(raw: &str) -> Result<u16> {
    match raw.trim().parse::<u16>() {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(Error::InvalidCommand(format!(
            "port {raw:?} out of range 1-65535"
        ))),
    }
}

/// Reconnect pacing.
///
/// 重连节奏参数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before a reconnect while failures are below the threshold.
    /// 失败次数低于阈值时的重连延迟。
    pub base_interval: Duration,
    /// Delay used once `failure_threshold` consecutive failures were seen.
    /// 连续失败达到阈值后使用的延迟。
    pub slow_interval: Duration,
    /// Number of consecutive failures that switches to `slow_interval`.
    /// 切换到 `slow_interval` 的连续失败次数。
    pub failure_threshold: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(5000),
            slow_interval: Duration::from_millis(10000),
            failure_threshold: 3,
        }
    }
}

/// Socket-level options for the device connection.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Enable TCP_NODELAY (disable Nagle's algorithm). Commands are small and latency sensitive.
    pub no_delay: bool,
    /// Connection timeout. `None` leaves it to the operating system.
    pub connect_timeout: Option<Duration>,
    /// Upper bound for a single write; a stuck write is treated as a connection error.
    pub write_timeout: Duration,
    /// Read buffer size in bytes.
    pub read_buffer_size: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            no_delay: true,
            connect_timeout: Some(Duration::from_secs(5)),
            write_timeout: Duration::from_secs(5),
            read_buffer_size: 4096,
        }
    }
}

/// Tunable parameters of the connection manager itself.
///
/// 连接管理器自身的可调参数。
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Reconnect pacing.
    /// 重连节奏。
    pub retry: RetryPolicy,
    /// Socket options.
    /// 套接字选项。
    pub socket: SocketConfig,
    /// Bytes appended to every payload before it is written.
    /// 每个载荷写入前附加的字节。
    pub line_terminator: Bytes,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            socket: SocketConfig::default(),
            line_terminator: Bytes::from_static(b"\n"),
        }
    }
}

impl ManagerConfig {
    /// Set the retry policy.
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set socket options.
    pub fn socket_config(mut self, socket: SocketConfig) -> Self {
        self.socket = socket;
        self
    }

    /// Set the line terminator.
    pub fn line_terminator(mut self, terminator: impl Into<Bytes>) -> Self {
        self.line_terminator = terminator.into();
        self
    }
}
