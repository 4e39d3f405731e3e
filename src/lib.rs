#![deny(clippy::expect_used, clippy::unwrap_used)]

//! A self-healing TCP link to a Photon media server.
//! 到 Photon 媒体服务器的自愈TCP链路。
//!
//! [`ConnectionManager`] keeps one connection to the configured device alive,
//! reconnecting with backoff, and publishes its health as [`StatusSnapshot`]s.
//! [`CommandDispatcher`] turns named operations into the device's line-oriented
//! wire format and sends them through the manager.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod retry;
pub mod status;
pub mod transport;

mod testing;

pub use config::{Config, ManagerConfig, RetryPolicy, SocketConfig, DEFAULT_PORT};
pub use dispatch::{Action, Command, CommandDispatcher, CommandSink, SpecialCode};
pub use error::{Error, Result};
pub use manager::ConnectionManager;
pub use status::{ConnectionState, ConnectionStatus, StatusSnapshot};
pub use transport::{Connector, TcpConnector};
