//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use thiserror::Error;

/// The primary error type for the photon link library.
/// photon 链路库的主要错误类型。
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying I/O error occurred on an established connection.
    /// 已建立的连接上发生了底层I/O错误。
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration cannot be used to open a connection (e.g. no host).
    /// 配置无法用于打开连接（例如未设置主机）。
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The configuration document delivered by the host could not be decoded.
    /// 宿主提供的配置文档无法解码。
    #[error("Failed to decode configuration: {0}")]
    ConfigFormat(#[from] serde_json::Error),

    /// The remote device refused or could not be reached.
    /// 远端设备拒绝连接或不可达。
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The connect attempt did not complete in time.
    /// 连接尝试未能及时完成。
    #[error("Connection attempt to {0} timed out")]
    ConnectTimeout(String),

    /// The connection was closed by the peer.
    /// 连接被对端关闭。
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// A write did not complete within the configured write timeout.
    /// 写操作未在配置的写超时内完成。
    #[error("Write timed out")]
    WriteTimeout,

    /// A command argument was rejected before anything was sent.
    /// 命令参数在发送前被拒绝。
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// The connection manager has been shut down.
    /// 连接管理器已关闭。
    #[error("Connection manager has been shut down")]
    Shutdown,
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true for errors raised while opening a connection.
    pub fn is_connect_error(&self) -> bool {
        matches!(self, Error::Connect { .. } | Error::ConnectTimeout(_))
    }
}
