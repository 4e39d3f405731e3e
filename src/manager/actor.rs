//! The actor that owns the connection and runs its state machine.
//!
//! 拥有连接并运行其状态机的actor。
//!
//! All lifecycle state (configuration, state, failure counter, retry interval,
//! the live session and the pending retry) lives here and is mutated only from
//! the actor's event loop. Connect attempts and socket I/O run in helper tasks
//! which report back through channels; every report carries the attempt or
//! session id it belongs to so that reports from torn-down attempts are
//! dropped.
//!
//! 所有生命周期状态都存放在这里，并且只在 actor 的事件循环中修改。

use super::{
    command::{ConnectOutcome, ManagerCommand, SessionEvent},
    session::Session,
};
use crate::{
    config::{Config, ManagerConfig},
    error::{Error, Result},
    retry::{Backoff, RetryTimer},
    status::{ConnectionState, ConnectionStatus, StatusListener, StatusSnapshot},
    transport::Connector,
};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, trace, warn};

pub(crate) struct ManagerActor<C: Connector> {
    connector: Arc<C>,
    settings: ManagerConfig,
    config: Option<Config>,
    state: ConnectionState,
    backoff: Backoff,
    retry: RetryTimer,
    /// Id of the most recent connect attempt. Sessions reuse the id of the
    /// attempt that opened them.
    attempt: u64,
    connecting: Option<JoinHandle<()>>,
    session: Option<Session>,
    listeners: Vec<StatusListener>,
    status_tx: watch::Sender<StatusSnapshot>,
    command_rx: mpsc::UnboundedReceiver<ManagerCommand>,
    connect_tx: mpsc::UnboundedSender<ConnectOutcome<C::Stream>>,
    connect_rx: mpsc::UnboundedReceiver<ConnectOutcome<C::Stream>>,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
    session_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl<C: Connector> ManagerActor<C> {
    pub(crate) fn new(
        settings: ManagerConfig,
        connector: C,
        command_rx: mpsc::UnboundedReceiver<ManagerCommand>,
        status_tx: watch::Sender<StatusSnapshot>,
    ) -> Self {
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        Self {
            connector: Arc::new(connector),
            backoff: Backoff::new(settings.retry.clone()),
            settings,
            config: None,
            state: ConnectionState::Unconfigured,
            retry: RetryTimer::default(),
            attempt: 0,
            connecting: None,
            session: None,
            listeners: Vec::new(),
            status_tx,
            command_rx,
            connect_tx,
            connect_rx,
            session_tx,
            session_rx,
        }
    }

    /// Runs the actor's main event loop until shutdown or until every handle
    /// has been dropped.
    ///
    /// 运行 actor 的主事件循环，直到关闭或所有句柄都被丢弃。
    pub(crate) async fn run(&mut self) {
        loop {
            let retry_at = self.retry.deadline();
            tokio::select! {
                biased; // Commands first, so a shutdown is never starved by I/O events.

                // 1. Handle commands from the public handle.
                // 1. 处理来自公共句柄的命令。
                command = self.command_rx.recv() => {
                    let keep_running = match command {
                        Some(command) => self.handle_command(command),
                        None => {
                            self.teardown("all handles dropped");
                            false
                        }
                    };
                    if !keep_running {
                        break;
                    }
                }

                // 2. Handle events from the live session.
                // 2. 处理来自活动会话的事件。
                Some(event) = self.session_rx.recv() => {
                    self.handle_session_event(event);
                }

                // 3. Handle finished connect attempts.
                // 3. 处理已完成的连接尝试。
                Some(outcome) = self.connect_rx.recv() => {
                    self.handle_connect_outcome(outcome);
                }

                // 4. Fire the pending retry.
                // 4. 触发待处理的重试。
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.on_retry_due();
                }
            }
        }
        debug!("Connection manager stopped");
    }

    /// Handles a command. Returns false once the actor should stop.
    fn handle_command(&mut self, command: ManagerCommand) -> bool {
        match command {
            ManagerCommand::Configure {
                config,
                response_tx,
            } => {
                let result = self.apply_config(config);
                let _ = response_tx.send(result);
            }
            ManagerCommand::Send {
                payload,
                response_tx,
            } => {
                let sent = self.send_line(payload);
                let _ = response_tx.send(sent);
            }
            ManagerCommand::Subscribe { listener } => {
                self.listeners.push(listener);
            }
            ManagerCommand::GetConfig { response_tx } => {
                let _ = response_tx.send(self.config.clone());
            }
            ManagerCommand::Shutdown { response_tx } => {
                self.command_rx.close();
                self.teardown("shutdown requested");
                let _ = response_tx.send(());
                return false;
            }
        }
        true
    }

    /// Replaces the configuration and restarts the state machine.
    ///
    /// The failure counter and retry interval are kept; only a successful
    /// connect resets them.
    ///
    /// 替换配置并重启状态机。失败计数和重试间隔保持不变。
    fn apply_config(&mut self, config: Config) -> Result<()> {
        if config.verbose {
            info!(host = %config.host, port = config.port, "Configuration updated");
        }

        self.retry.cancel();
        self.cancel_connect();
        self.close_session("reconfigured");

        let has_host = config.has_host();
        self.config = Some(config);

        if !has_host {
            error!("Connection aborted: host not set");
            self.transition(ConnectionState::Unconfigured, Some("Host not set".to_string()));
            return Err(Error::Configuration("host not set".to_string()));
        }

        self.start_attempt();
        Ok(())
    }

    /// Spawns a connect task for the current configuration.
    fn start_attempt(&mut self) {
        let Some(config) = self.config.as_ref().filter(|c| c.has_host()) else {
            return;
        };
        let host = config.host.trim().to_string();
        let port = config.port;
        let verbose = config.verbose;

        self.attempt += 1;
        let attempt = self.attempt;
        if verbose {
            info!(
                addr = %format!("{host}:{port}"),
                attempt,
                interval_ms = self.backoff.current_interval().as_millis() as u64,
                "Attempting to connect"
            );
        }

        let connector = self.connector.clone();
        let connect_tx = self.connect_tx.clone();
        self.connecting = Some(tokio::spawn(async move {
            let result = connector.connect(&host, port).await;
            let _ = connect_tx.send(ConnectOutcome { attempt, result });
        }));

        self.transition(ConnectionState::Connecting, None);
    }

    fn handle_connect_outcome(&mut self, outcome: ConnectOutcome<C::Stream>) {
        if outcome.attempt != self.attempt || self.connecting.is_none() {
            // Dropping a stale stream closes it.
            trace!(attempt = outcome.attempt, "Ignoring outcome of a cancelled connect attempt");
            return;
        }
        self.connecting = None;

        match outcome.result {
            Ok(stream) => {
                let verbose = self.verbose();
                self.backoff.on_success();
                self.session = Some(Session::start(
                    outcome.attempt,
                    stream,
                    &self.settings.socket,
                    verbose,
                    self.session_tx.clone(),
                ));
                if verbose {
                    info!(addr = %self.address(), "TCP connection established");
                }
                self.transition(ConnectionState::Connected, None);
            }
            Err(e) => {
                error!(addr = %self.address(), "Network error: {}", e);
                self.on_link_failure(ConnectionState::Errored, e.to_string());
            }
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        let session = event.session();
        if self.session.as_ref().map(Session::id) != Some(session) {
            trace!(session, "Ignoring event of a released session");
            return;
        }

        let (state, message) = match event {
            SessionEvent::Closed { .. } => {
                if self.verbose() {
                    warn!(addr = %self.address(), "TCP connection closed");
                }
                (ConnectionState::Disconnected, Error::ConnectionClosed.to_string())
            }
            SessionEvent::Failed { error, .. } => {
                error!(addr = %self.address(), "Network error: {}", error);
                (ConnectionState::Errored, error.to_string())
            }
        };
        self.close_session("connection lost");
        self.on_link_failure(state, message);
    }

    /// Counts a failure, publishes `state` and schedules the reconnect.
    ///
    /// 计入一次失败，发布 `state` 并安排重连。
    fn on_link_failure(&mut self, state: ConnectionState, message: String) {
        if self.backoff.on_failure() {
            warn!(
                failures = self.backoff.consecutive_failures(),
                interval_ms = self.backoff.current_interval().as_millis() as u64,
                "Too many failures. Slowing reconnect interval."
            );
        }
        self.transition(state, Some(message));

        let delay = self.backoff.current_interval();
        self.retry.schedule(delay);
        debug!(delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
    }

    fn on_retry_due(&mut self) {
        self.retry.cancel();
        self.start_attempt();
    }

    /// Appends the line terminator and queues the line if connected.
    fn send_line(&self, payload: Bytes) -> bool {
        let session = match (&self.state, self.session.as_ref()) {
            (ConnectionState::Connected, Some(session)) => session,
            _ => {
                debug!(state = %self.state, "Cannot send: not connected");
                return false;
            }
        };

        let terminator = &self.settings.line_terminator;
        let mut line = BytesMut::with_capacity(payload.len() + terminator.len());
        line.extend_from_slice(&payload);
        line.extend_from_slice(terminator);
        if self.verbose() {
            debug!(payload = %String::from_utf8_lossy(&payload), "Sending command");
        }
        session.write(line.freeze())
    }

    /// Releases every resource. No transition is published afterwards.
    ///
    /// 释放所有资源。之后不再发布任何转换。
    fn teardown(&mut self, reason: &str) {
        if self.verbose() {
            info!(reason, "Tearing down connection");
        }
        self.retry.cancel();
        self.cancel_connect();
        self.close_session(reason);
        self.listeners.clear();
    }

    fn cancel_connect(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
            trace!(attempt = self.attempt, "Connect attempt cancelled");
        }
    }

    /// Releases the live session, if any. Taking it out of the slot makes a
    /// second release impossible.
    fn close_session(&mut self, reason: &str) {
        if let Some(session) = self.session.take() {
            if self.verbose() {
                debug!(session = session.id(), reason, "Existing socket found, destroying it");
            }
            drop(session);
        }
    }

    fn transition(&mut self, state: ConnectionState, message: Option<String>) {
        self.state = state;
        let snapshot = self.snapshot(message);
        if self.verbose() {
            info!(
                state = %snapshot.state,
                failures = snapshot.consecutive_failures,
                "Connection status changed"
            );
        } else {
            debug!(
                state = %snapshot.state,
                failures = snapshot.consecutive_failures,
                "Connection status changed"
            );
        }
        for listener in &self.listeners {
            listener(&snapshot);
        }
        self.status_tx.send_replace(snapshot);
    }

    fn snapshot(&self, message: Option<String>) -> StatusSnapshot {
        let (target_host, target_port) = match &self.config {
            Some(config) if self.state != ConnectionState::Unconfigured => {
                (config.host.trim().to_string(), Some(config.port))
            }
            _ => (String::new(), None),
        };
        StatusSnapshot {
            state: self.state,
            status: ConnectionStatus::for_state(self.state, self.config.is_some()),
            target_host,
            target_port,
            consecutive_failures: self.backoff.consecutive_failures(),
            retry_interval: self.backoff.current_interval(),
            message,
        }
    }

    fn verbose(&self) -> bool {
        self.config.as_ref().is_some_and(|c| c.verbose)
    }

    fn address(&self) -> String {
        self.config
            .as_ref()
            .map(Config::address)
            .unwrap_or_default()
    }
}

impl<C: Connector> Drop for ManagerActor<C> {
    fn drop(&mut self) {
        // Covers exits that skipped `teardown`, e.g. the runtime shutting down.
        self.cancel_connect();
        drop(self.session.take());
    }
}
