//! 将命名操作翻译为设备的线路格式并请求发送。
//! Translates named operations into the device's wire format and requests
//! transmission.
//!
//! Every command is framed as `<photon> <OPCODE> <value> </photon>`; the
//! connection manager appends the line terminator. Dispatch is at-most-once:
//! a command that cannot be sent is reported and dropped, never queued.
//!
//! 每条命令的格式为 `<photon> <OPCODE> <value> </photon>`；行终止符由连接管理器附加。

use crate::{
    config::{Config, parse_port},
    error::{Error, Result},
    manager::ConnectionManager,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Opcode of the recall-cue command.
pub const CUE_EXEC_OPCODE: &str = "CUE_EXEC_ID";
/// Opcode of the special-code command.
pub const SPECIAL_CODE_OPCODE: &str = "90BC9E48_6D84_4F8C_AA23_72E3379AC71C";

/// The fixed set of special codes the device understands.
///
/// 设备可识别的固定特殊代码集合。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialCode {
    RestartPhoton,
    RebootServer,
    QuitPhoton,
    ShutdownServer,
    ToggleUiVisibility,
}

impl SpecialCode {
    /// Every code, in the order the host lists them.
    pub const ALL: [SpecialCode; 5] = [
        SpecialCode::RestartPhoton,
        SpecialCode::RebootServer,
        SpecialCode::QuitPhoton,
        SpecialCode::ShutdownServer,
        SpecialCode::ToggleUiVisibility,
    ];

    /// The numeric code sent on the wire.
    pub fn code(self) -> u8 {
        match self {
            SpecialCode::RestartPhoton => 4,
            SpecialCode::RebootServer => 5,
            SpecialCode::QuitPhoton => 6,
            SpecialCode::ShutdownServer => 7,
            SpecialCode::ToggleUiVisibility => 10,
        }
    }

    /// Human readable label for the host's selection list.
    pub fn label(self) -> &'static str {
        match self {
            SpecialCode::RestartPhoton => "Restart Photon",
            SpecialCode::RebootServer => "Reboot Server",
            SpecialCode::QuitPhoton => "Quit Photon",
            SpecialCode::ShutdownServer => "Shutdown Server",
            SpecialCode::ToggleUiVisibility => "Toggle UI Visibility",
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

impl TryFrom<u8> for SpecialCode {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        Self::from_code(code)
            .ok_or_else(|| Error::InvalidCommand(format!("unknown special code {code}")))
    }
}

impl FromStr for SpecialCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u8>()
            .ok()
            .and_then(Self::from_code)
            .ok_or_else(|| Error::InvalidCommand(format!("unknown special code {s:?}")))
    }
}

impl fmt::Display for SpecialCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A command for the device.
///
/// 发给设备的命令。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Recall a cue by its decimal id.
    /// 按十进制ID调用一个cue。
    RecallCue(String),
    /// Send one of the special codes.
    /// 发送一个特殊代码。
    SpecialCode(SpecialCode),
}

impl Command {
    /// Builds a recall-cue command. The id must be a non-empty run of ASCII
    /// digits; anything else would corrupt the line framing.
    pub fn recall_cue(cue: &str) -> Result<Self> {
        if cue.is_empty() || !cue.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidCommand(format!("cue id {cue:?} is not a number")));
        }
        Ok(Command::RecallCue(cue.to_string()))
    }

    /// Renders the command without the line terminator.
    pub fn to_wire(&self) -> String {
        match self {
            Command::RecallCue(cue) => frame(CUE_EXEC_OPCODE, cue),
            Command::SpecialCode(code) => frame(SPECIAL_CODE_OPCODE, code),
        }
    }
}

fn frame(opcode: &str, value: impl fmt::Display) -> String {
    format!("<photon> {opcode} {value} </photon>")
}

/// An action invoked by the host, as identified by its action id and options.
///
/// Arguments are kept as typed by the user; they are validated when the
/// action is handled so that a malformed one is reported rather than parsed
/// away.
///
/// 宿主调用的操作，由操作ID和选项标识。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// `cue_exec { cue }`
    RecallCue { cue: String },
    /// `spec_code { s_code }`
    SpecialCode { code: String },
    /// `update_port { new_port }`
    UpdatePort { new_port: String },
    /// `update_ip { new_ip }`
    UpdateIp { new_ip: String },
}

impl Action {
    /// Parses the host's action id and JSON options object.
    pub fn parse(action_id: &str, options: &serde_json::Value) -> Result<Self> {
        let option = |name: &str| -> Result<String> {
            match options.get(name) {
                Some(serde_json::Value::String(s)) => Ok(s.clone()),
                Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
                _ => Err(Error::InvalidCommand(format!(
                    "action {action_id:?} is missing option {name:?}"
                ))),
            }
        };
        match action_id {
            "cue_exec" => Ok(Action::RecallCue { cue: option("cue")? }),
            "spec_code" => Ok(Action::SpecialCode {
                code: option("s_code")?,
            }),
            "update_port" => Ok(Action::UpdatePort {
                new_port: option("new_port")?,
            }),
            "update_ip" => Ok(Action::UpdateIp {
                new_ip: option("new_ip")?,
            }),
            other => Err(Error::InvalidCommand(format!("unknown action {other:?}"))),
        }
    }
}

/// Where dispatched lines go.
///
/// 派发的行的去向。
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Sends one line (without terminator). Returns false if nothing was sent.
    async fn send_line(&self, line: Bytes) -> bool;
}

#[async_trait]
impl CommandSink for ConnectionManager {
    async fn send_line(&self, line: Bytes) -> bool {
        self.send(line).await
    }
}

/// Turns named operations into wire lines and hands them to a
/// [`CommandSink`], normally the [`ConnectionManager`].
///
/// 将命名操作转换为线路行并交给 [`CommandSink`]。
#[derive(Debug, Clone)]
pub struct CommandDispatcher<S = ConnectionManager> {
    sink: S,
}

impl<S: CommandSink> CommandDispatcher<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Sends `command` once. Returns whether it was handed to the connection.
    pub async fn dispatch(&self, command: &Command) -> bool {
        let line = command.to_wire();
        debug!(command = %line, "Dispatching command");
        let sent = self.sink.send_line(Bytes::from(line)).await;
        if !sent {
            warn!("Socket not connected, cannot send");
        }
        sent
    }

    /// Recalls cue `cue`. A non-numeric id is declined without sending.
    pub async fn recall_cue(&self, cue: &str) -> bool {
        match Command::recall_cue(cue) {
            Ok(command) => self.dispatch(&command).await,
            Err(e) => {
                warn!("Declining recall: {}", e);
                false
            }
        }
    }

    pub async fn special_code(&self, code: SpecialCode) -> bool {
        self.dispatch(&Command::SpecialCode(code)).await
    }

    /// Sends the special code identified by its decimal id, as the host's
    /// selection list delivers it. Unknown ids are declined without sending.
    pub async fn special_code_id(&self, id: &str) -> bool {
        match id.parse::<SpecialCode>() {
            Ok(code) => self.special_code(code).await,
            Err(e) => {
                warn!("Declining special code: {}", e);
                false
            }
        }
    }
}

impl CommandDispatcher<ConnectionManager> {
    /// Points the manager at a new port, keeping the rest of the current
    /// configuration, and reconnects immediately.
    ///
    /// Returns the configuration now in effect so the host can persist it.
    ///
    /// 将管理器指向新端口并立即重连。返回当前生效的配置以便宿主持久化。
    pub async fn update_port(&self, new_port: &str) -> Result<Config> {
        let port = parse_port(new_port)?;
        let mut config = self.sink.config().await.unwrap_or_default();
        config.port = port;
        if config.verbose {
            info!(port, "Updating target port");
        }
        self.apply(config).await
    }

    /// Points the manager at a new IPv4 address and reconnects immediately.
    ///
    /// 将管理器指向新的IPv4地址并立即重连。
    pub async fn update_ip(&self, new_ip: &str) -> Result<Config> {
        let host = new_ip.trim();
        if host.parse::<Ipv4Addr>().is_err() {
            return Err(Error::InvalidCommand(format!(
                "{new_ip:?} is not an IPv4 address"
            )));
        }
        let mut config = self.sink.config().await.unwrap_or_default();
        config.host = host.to_string();
        if config.verbose {
            info!(host, "Updating target IP");
        }
        self.apply(config).await
    }

    async fn apply(&self, config: Config) -> Result<Config> {
        match self.sink.configure(config.clone()).await {
            // The configuration is stored even when it cannot connect yet.
            Ok(()) | Err(Error::Configuration(_)) => Ok(config),
            Err(e) => Err(e),
        }
    }

    /// Runs a host action. Returns whether it took effect.
    pub async fn handle_action(&self, action: Action) -> bool {
        debug!(?action, "Action triggered");
        match action {
            Action::RecallCue { cue } => self.recall_cue(&cue).await,
            Action::SpecialCode { code } => self.special_code_id(&code).await,
            Action::UpdatePort { new_port } => self.report(self.update_port(&new_port).await),
            Action::UpdateIp { new_ip } => self.report(self.update_ip(&new_ip).await),
        }
    }

    fn report(&self, result: Result<Config>) -> bool {
        match result {
            Ok(_) => true,
            Err(e) => {
                warn!("Declining configuration update: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::Mutex;

    /// Records what would have been written.
    #[derive(Default)]
    struct RecordingSink {
        connected: bool,
        lines: Mutex<Vec<Bytes>>,
    }

    impl RecordingSink {
        fn connected() -> Self {
            Self {
                connected: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl CommandSink for RecordingSink {
        async fn send_line(&self, line: Bytes) -> bool {
            if !self.connected {
                return false;
            }
            self.lines.lock().await.push(line);
            true
        }
    }

    #[test]
    fn test_wire_format() {
        assert_eq!(
            Command::recall_cue("12").unwrap().to_wire(),
            "<photon> CUE_EXEC_ID 12 </photon>"
        );
        assert_eq!(
            Command::SpecialCode(SpecialCode::ToggleUiVisibility).to_wire(),
            "<photon> 90BC9E48_6D84_4F8C_AA23_72E3379AC71C 10 </photon>"
        );
    }

    #[test]
    fn test_special_codes() {
        let codes: Vec<u8> = SpecialCode::ALL.iter().map(|c| c.code()).collect();
        assert_eq!(codes, vec![4, 5, 6, 7, 10]);
        assert_eq!("7".parse::<SpecialCode>().unwrap(), SpecialCode::ShutdownServer);
        assert_eq!(SpecialCode::try_from(4).unwrap().label(), "Restart Photon");
        assert!("8".parse::<SpecialCode>().is_err());
        assert!("".parse::<SpecialCode>().is_err());
        assert!(SpecialCode::try_from(0).is_err());
    }

    #[test]
    fn test_malformed_cue_ids() {
        for cue in ["", "abc", "12 3", "-1", "1.5", "7\n"] {
            assert!(
                matches!(Command::recall_cue(cue), Err(Error::InvalidCommand(_))),
                "{cue:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_recall_cue_dispatch() {
        let dispatcher = CommandDispatcher::new(RecordingSink::connected());
        assert!(dispatcher.recall_cue("12").await);
        assert!(!dispatcher.recall_cue("twelve").await);

        let lines = dispatcher.sink().lines.lock().await;
        assert_eq!(lines.len(), 1);
        assert_eq!(&lines[0][..], b"<photon> CUE_EXEC_ID 12 </photon>");
    }

    #[tokio::test]
    async fn test_special_code_while_disconnected() {
        let dispatcher = CommandDispatcher::new(RecordingSink::default());
        assert!(!dispatcher.special_code(SpecialCode::ShutdownServer).await);
        assert!(!dispatcher.special_code_id("7").await);
        assert!(dispatcher.sink().lines.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_special_code_is_declined() {
        let dispatcher = CommandDispatcher::new(RecordingSink::connected());
        assert!(!dispatcher.special_code_id("99").await);
        assert!(dispatcher.special_code_id("5").await);

        let lines = dispatcher.sink().lines.lock().await;
        assert_eq!(lines.len(), 1);
        assert_eq!(
            &lines[0][..],
            b"<photon> 90BC9E48_6D84_4F8C_AA23_72E3379AC71C 5 </photon>"
        );
    }

    #[test]
    fn test_action_parse() {
        assert_eq!(
            Action::parse("cue_exec", &json!({"cue": "12"})).unwrap(),
            Action::RecallCue {
                cue: "12".to_string()
            }
        );
        assert_eq!(
            Action::parse("spec_code", &json!({"s_code": "10"})).unwrap(),
            Action::SpecialCode {
                code: "10".to_string()
            }
        );
        assert_eq!(
            Action::parse("update_port", &json!({"new_port": 4000})).unwrap(),
            Action::UpdatePort {
                new_port: "4000".to_string()
            }
        );
        assert_eq!(
            Action::parse("update_ip", &json!({"new_ip": "10.0.0.9"})).unwrap(),
            Action::UpdateIp {
                new_ip: "10.0.0.9".to_string()
            }
        );
        assert!(Action::parse("cue_exec", &json!({})).is_err());
        assert!(Action::parse("reboot", &json!({})).is_err());
    }
}
