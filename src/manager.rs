//! The connection manager: one self-healing TCP connection to the device.
//!
//! [`ConnectionManager`] is a cheap handle to an actor task that owns the
//! socket, the reconnect backoff and the pending retry timer.
//!
//! 连接管理器：到设备的一个自愈TCP连接。
mod actor;
mod command;
mod handle;
mod session;

pub use handle::ConnectionManager;
