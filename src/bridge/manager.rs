//! Per-connection SSH bridge
//!
//! `SshBridge` owns the state of one terminal connection. It is driven by
//! two inputs: raw messages from the display surface ([`SshBridge::handle_message`])
//! and events produced by its own background tasks ([`SshBridge::handle_event`]).
//! Both are called from a single task (see `bridge::task`), so the state is
//! never shared.
//!
//! Every connect attempt gets a fresh attempt number and every data channel a
//! fresh sequence number. Events carry both; anything from a superseded
//! attempt or channel is dropped.

use std::sync::Arc;

use bytes::Bytes;
use encoding_rs::{Decoder, UTF_8};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::diagnostics::{DiagnosticSnapshot, OutputHistory, SnapshotSource};
use super::emitter::{DisplaySurface, OutboundEmitter, Throttle};
use super::error::BridgeError;
use super::state::{
    ConnectionState, ConnectionStatus, Dimensions, LifecycleEvent, ModeEvent, TransportMode,
};
use crate::config::BridgeSettings;
use crate::protocol::{
    self, now_millis, Decoded, InboundMessage, MetadataPayload, OutboundMessage, TerminalSize,
};
use crate::ssh::{
    legacy_retry_config, AlgorithmSet, ChannelHandle, ChannelOutput, ConnectRequest,
    ConnectionConfig, Connector, PtyRequest, SessionCommand, SshError, Transport,
};

const INIT_BANNER: &str = "SSH Terminal initialized. Waiting for connection...\r\n";
const FALLBACK_NOTICE: &str = "\r\nDetected a network device that doesn't support interactive shell.\r\nSwitching to alternative connection method...\r\n";

/// Capacity of a bridge's event queue. Channel output waits here while the
/// bridge is busy, which in turn stalls the channel task.
pub(crate) const EVENT_QUEUE: usize = 64;

/// Events produced by a bridge's background tasks
pub enum BridgeEvent {
    /// Pre-auth banner text from the server
    Banner { attempt: u64, text: String },
    Ready {
        attempt: u64,
        transport: Arc<dyn Transport>,
    },
    ConnectFailed { attempt: u64, error: SshError },
    ChannelOpened {
        attempt: u64,
        mode: TransportMode,
        pty: PtyRequest,
        channel: ChannelHandle,
    },
    ChannelFailed {
        attempt: u64,
        mode: TransportMode,
        error: SshError,
    },
    ChannelOutput {
        attempt: u64,
        channel: u64,
        output: ChannelOutput,
    },
    TransportClosed { attempt: u64 },
}

impl BridgeEvent {
    fn attempt(&self) -> u64 {
        match self {
            Self::Banner { attempt, .. }
            | Self::Ready { attempt, .. }
            | Self::ConnectFailed { attempt, .. }
            | Self::ChannelOpened { attempt, .. }
            | Self::ChannelFailed { attempt, .. }
            | Self::ChannelOutput { attempt, .. }
            | Self::TransportClosed { attempt } => *attempt,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Banner { .. } => "banner",
            Self::Ready { .. } => "ready",
            Self::ConnectFailed { .. } => "connect-failed",
            Self::ChannelOpened { .. } => "channel-opened",
            Self::ChannelFailed { .. } => "channel-failed",
            Self::ChannelOutput { .. } => "channel-output",
            Self::TransportClosed { .. } => "transport-closed",
        }
    }
}

/// Live data channel
struct ActiveChannel {
    seq: u64,
    cmd_tx: mpsc::Sender<SessionCommand>,
    pump: JoinHandle<()>,
    stdout: Decoder,
    stderr: Decoder,
}

impl ActiveChannel {
    fn close(self) {
        let _ = self.cmd_tx.try_send(SessionCommand::Close);
        self.pump.abort();
    }
}

/// Decode a chunk, carrying incomplete UTF-8 sequences over to the next one.
fn decode_chunk(decoder: &mut Decoder, bytes: &[u8], last: bool) -> String {
    let capacity = decoder
        .max_utf8_buffer_length(bytes.len())
        .unwrap_or(bytes.len() * 3 + 4);
    let mut text = String::with_capacity(capacity);
    let _ = decoder.decode_to_string(bytes, &mut text, last);
    text
}

fn status_summary(status: ConnectionStatus) -> &'static str {
    match status {
        ConnectionStatus::Disconnected => "Terminal ready, waiting to connect",
        ConnectionStatus::Connecting => "Connection in progress",
        ConnectionStatus::Connected => "Connected",
        ConnectionStatus::Error => "Connection error",
    }
}

async fn run_connect(
    connector: Arc<dyn Connector>,
    mut request: ConnectRequest,
    events: mpsc::Sender<BridgeEvent>,
    attempt: u64,
) {
    let (banner_tx, mut banner_rx) = mpsc::unbounded_channel();
    request.banner_tx = Some(banner_tx);

    let result = connector.connect(request).await;

    while let Ok(text) = banner_rx.try_recv() {
        let _ = events.send(BridgeEvent::Banner { attempt, text }).await;
    }
    let event = match result {
        Ok(transport) => BridgeEvent::Ready { attempt, transport },
        Err(error) => BridgeEvent::ConnectFailed { attempt, error },
    };
    let _ = events.send(event).await;
}

/// Forward a channel's output into the bridge's event queue.
fn spawn_pump(
    mut output_rx: mpsc::Receiver<ChannelOutput>,
    events: mpsc::Sender<BridgeEvent>,
    attempt: u64,
    channel: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(output) = output_rx.recv().await {
            let closed = output == ChannelOutput::Closed;
            if events
                .send(BridgeEvent::ChannelOutput {
                    attempt,
                    channel,
                    output,
                })
                .await
                .is_err()
                || closed
            {
                return;
            }
        }
        // channel task went away without reporting
        let _ = events
            .send(BridgeEvent::ChannelOutput {
                attempt,
                channel,
                output: ChannelOutput::Closed,
            })
            .await;
    })
}

pub struct SshBridge {
    connection_id: String,
    session_id: String,
    state: ConnectionState,
    emitter: OutboundEmitter,
    connector: Arc<dyn Connector>,
    settings: Arc<BridgeSettings>,
    events_tx: mpsc::Sender<BridgeEvent>,
    attempt: u64,
    connect_task: Option<JoinHandle<()>>,
    close_watcher: Option<JoinHandle<()>>,
    transport: Option<Arc<dyn Transport>>,
    /// Algorithm preferences offered by the current attempt
    offered: Option<AlgorithmSet>,
    channel: Option<ActiveChannel>,
    channel_seq: u64,
    history: OutputHistory,
}

impl SshBridge {
    /// Create a bridge and greet the display surface.
    pub async fn new(
        connection_id: impl Into<String>,
        session_id: impl Into<String>,
        surface: Arc<dyn DisplaySurface>,
        connector: Arc<dyn Connector>,
        settings: Arc<BridgeSettings>,
        events_tx: mpsc::Sender<BridgeEvent>,
    ) -> Self {
        let connection_id = connection_id.into();
        let session_id = session_id.into();
        info!(
            "Creating SSH bridge {} for session {}",
            connection_id, session_id
        );

        let emitter = OutboundEmitter::new(
            &connection_id,
            &session_id,
            surface,
            Throttle::from(settings.as_ref()),
        );
        let mut bridge = Self {
            connection_id,
            session_id,
            state: ConnectionState::default(),
            emitter,
            connector,
            settings,
            events_tx,
            attempt: 0,
            connect_task: None,
            close_watcher: None,
            transport: None,
            offered: None,
            channel: None,
            channel_seq: 0,
            history: OutputHistory::default(),
        };

        bridge.output(INIT_BANNER).await;
        bridge
            .emit(OutboundMessage::status(
                ConnectionStatus::Disconnected,
                status_summary(ConnectionStatus::Disconnected),
            ))
            .await;
        bridge
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    pub fn transport_mode(&self) -> TransportMode {
        self.state.transport_mode()
    }

    pub fn dimensions(&self) -> Dimensions {
        self.state.dimensions
    }

    pub fn bytes_sent(&self) -> u64 {
        self.state.bytes_sent()
    }

    pub fn bytes_received(&self) -> u64 {
        self.state.bytes_received()
    }

    pub fn last_config(&self) -> Option<&ConnectionConfig> {
        self.state.last_config.as_ref()
    }

    async fn emit(&mut self, message: OutboundMessage) {
        self.emitter.emit(message).await;
    }

    async fn output(&mut self, text: impl Into<String>) {
        self.emit(OutboundMessage::output(text)).await;
    }

    /// Handle one raw message from the display surface. Never fails: every
    /// problem becomes an `error` envelope or a log line.
    pub async fn handle_message(&mut self, raw: Value) {
        match protocol::decode(&raw, &self.connection_id) {
            Ok(Decoded::Message(message)) => self.handle_inbound(message).await,
            Ok(Decoded::Foreign { connection_id }) => debug!(
                "[{}] Ignoring message addressed to {}",
                self.connection_id, connection_id
            ),
            Ok(Decoded::Ignored(reason)) => {
                debug!("[{}] Ignoring message: {}", self.connection_id, reason)
            }
            Ok(Decoded::Invalid) => {
                warn!("[{}] Received invalid message format", self.connection_id)
            }
            Err(e) => {
                error!("[{}] Error handling message: {}", self.connection_id, e);
                self.report(BridgeError::InvalidParameters(e.to_string()))
                    .await;
            }
        }
    }

    /// Handle an already-decoded message.
    pub async fn handle_inbound(&mut self, message: InboundMessage) {
        debug!(
            "[{}] Received message: {}",
            self.connection_id,
            message.kind()
        );

        let result = match message {
            InboundMessage::Init { size } => {
                self.init(size).await;
                Ok(())
            }
            InboundMessage::Connect { config } => self.connect(config).await,
            InboundMessage::Input { data } => self.input(data).await,
            InboundMessage::Resize(size) => self.resize(size).await,
            InboundMessage::Disconnect => {
                self.disconnect().await;
                Ok(())
            }
            InboundMessage::Ping => {
                let status = self.state.status();
                self.emit(OutboundMessage::Pong {
                    time: now_millis(),
                    status,
                })
                .await;
                Ok(())
            }
            InboundMessage::Diagnostic => {
                self.send_diagnostics().await;
                Ok(())
            }
            InboundMessage::RetryWithLegacy => self.retry_with_legacy().await,
            InboundMessage::Unknown(kind) => {
                warn!("[{}] Unknown message type: {}", self.connection_id, kind);
                Ok(())
            }
        };

        if let Err(e) = result {
            self.report(e).await;
        }
    }

    async fn report(&mut self, err: BridgeError) {
        match &err {
            BridgeError::InvalidDimensions { .. } => {
                warn!("[{}] {}", self.connection_id, err);
            }
            BridgeError::ChannelUnavailable { .. } => {
                warn!("[{}] {}", self.connection_id, err);
                self.emit(OutboundMessage::error(err.to_string())).await;
                self.output(format!("\r\n[Warning] {}\r\n", err)).await;
            }
            BridgeError::NoPriorConnection => {
                warn!("[{}] {}", self.connection_id, err);
                self.output("\r\nError: No previous connection to retry with legacy algorithms.\r\n")
                    .await;
                self.emit(OutboundMessage::error(err.to_string())).await;
            }
            BridgeError::MissingParameters | BridgeError::InvalidParameters(_) => {
                error!("[{}] {}", self.connection_id, err);
                self.emit(OutboundMessage::error(err.to_string())).await;
            }
        }
    }

    async fn init(&mut self, size: Option<TerminalSize>) {
        if let Some(size) = size {
            match Dimensions::new(size.cols, size.rows) {
                Some(dimensions) => self.apply_dimensions(dimensions).await,
                None => warn!(
                    "[{}] Ignoring invalid initial dimensions {}x{}",
                    self.connection_id, size.cols, size.rows
                ),
            }
        }
        let status = self.state.status();
        info!(
            "[{}] Terminal initialized ({}x{}), status: {}",
            self.connection_id, self.state.dimensions.cols, self.state.dimensions.rows, status
        );
        self.emit(OutboundMessage::status(status, status_summary(status)))
            .await;
    }

    async fn connect(&mut self, config: Option<ConnectionConfig>) -> Result<(), BridgeError> {
        let config = config
            .filter(ConnectionConfig::has_required_fields)
            .ok_or(BridgeError::MissingParameters)?;
        self.start_connect(config).await;
        Ok(())
    }

    async fn start_connect(&mut self, config: ConnectionConfig) {
        if self.transport.is_some() || self.connect_task.is_some() {
            info!(
                "[{}] Replacing existing connection to start a new attempt",
                self.connection_id
            );
        }
        self.teardown().await;
        let attempt = self.attempt;

        self.state.apply_mode(ModeEvent::Reset);
        self.state.apply(LifecycleEvent::ConnectRequested);

        let auth_methods = config.resolved_auth_methods(&self.settings.default_auth_methods);
        let algorithms = AlgorithmSet::resolve(config.algorithms.as_ref());
        let (_, offered) = algorithms.to_preferred();
        self.offered = Some(offered);

        let method_names: Vec<&str> = auth_methods.iter().map(|m| m.as_str()).collect();
        info!(
            "[{}] Connecting to {}:{} as {} (password provided: {}, algorithms: {:?}, auth: {})",
            self.connection_id,
            config.host,
            config.port,
            config.username,
            if config.has_password() { "yes" } else { "no" },
            algorithms.profile,
            method_names.join(", ")
        );

        self.emit(OutboundMessage::status(
            ConnectionStatus::Connecting,
            format!("Connecting to {}:{}", config.host, config.port),
        ))
        .await;
        self.output(format!(
            "Connecting to {}:{} as {}...\r\n",
            config.host, config.port, config.username
        ))
        .await;
        self.output(format!(
            "Using {} authentication for {}@{}...\r\n",
            method_names.join(" and "),
            config.username,
            config.host
        ))
        .await;

        let request = ConnectRequest {
            label: self.connection_id.clone(),
            config: config.clone(),
            algorithms,
            auth_methods,
            prompt_policy: self.settings.keyboard_interactive_policy,
            max_kbi_rounds: self.settings.max_keyboard_interactive_rounds,
            ready_timeout: self.settings.ready_timeout(),
            keepalive_interval: self.settings.keepalive_interval(),
            keepalive_max: self.settings.keepalive_max,
            banner_tx: None,
        };
        self.state.last_config = Some(config);

        self.connect_task = Some(tokio::spawn(run_connect(
            self.connector.clone(),
            request,
            self.events_tx.clone(),
            attempt,
        )));
    }

    /// Release everything tied to the current attempt and invalidate its
    /// in-flight events. Ends the transport at most once.
    async fn teardown(&mut self) {
        self.attempt += 1;
        if let Some(task) = self.connect_task.take() {
            debug!("[{}] Aborting pending connect", self.connection_id);
            task.abort();
        }
        if let Some(watcher) = self.close_watcher.take() {
            watcher.abort();
        }
        if let Some(active) = self.channel.take() {
            active.close();
        }
        if let Some(transport) = self.transport.take() {
            transport.end().await;
        }
    }

    async fn input(&mut self, data: Option<String>) -> Result<(), BridgeError> {
        let Some(data) = data else {
            debug!("[{}] Ignoring input without data", self.connection_id);
            return Ok(());
        };

        let status = self.state.status();
        let tx = self
            .channel
            .as_ref()
            .filter(|_| status == ConnectionStatus::Connected)
            .map(|c| c.cmd_tx.clone());

        let len = data.len();
        let sent = match tx {
            Some(tx) => tx.send(SessionCommand::Data(Bytes::from(data))).await.is_ok(),
            None => false,
        };
        if !sent {
            return Err(BridgeError::ChannelUnavailable {
                channel_exists: self.channel.is_some(),
                status,
            });
        }

        self.state.record_sent(len);
        Ok(())
    }

    async fn resize(&mut self, size: TerminalSize) -> Result<(), BridgeError> {
        let dimensions =
            Dimensions::new(size.cols, size.rows).ok_or(BridgeError::InvalidDimensions {
                cols: size.cols,
                rows: size.rows,
            })?;
        self.apply_dimensions(dimensions).await;
        Ok(())
    }

    /// Store `dimensions` and push them to the live channel, if any.
    async fn apply_dimensions(&mut self, dimensions: Dimensions) {
        self.state.dimensions = dimensions;

        if self.state.status() == ConnectionStatus::Connected && self.channel.is_some() {
            debug!(
                "[{}] Resizing terminal to {}x{}",
                self.connection_id, dimensions.cols, dimensions.rows
            );
            self.send_to_channel(SessionCommand::Resize(dimensions.cols, dimensions.rows))
                .await;
        } else {
            debug!(
                "[{}] Stored dimensions {}x{} for the next channel",
                self.connection_id, dimensions.cols, dimensions.rows
            );
        }
    }

    async fn send_to_channel(&self, command: SessionCommand) -> bool {
        let Some(tx) = self.channel.as_ref().map(|c| c.cmd_tx.clone()) else {
            return false;
        };
        tx.send(command).await.is_ok()
    }

    /// Operator-requested disconnect. No-op when already disconnected.
    pub async fn disconnect(&mut self) {
        if self.state.status() == ConnectionStatus::Disconnected {
            debug!("[{}] Already disconnected", self.connection_id);
            return;
        }

        info!("[{}] Disconnecting SSH session", self.connection_id);
        self.output("\r\nDisconnecting from SSH session...\r\n").await;
        self.teardown().await;
        self.state.apply(LifecycleEvent::DisconnectRequested);
        self.emit(OutboundMessage::status(
            ConnectionStatus::Disconnected,
            "Disconnected",
        ))
        .await;
    }

    /// Release the connection without talking to the display surface.
    pub async fn dispose(&mut self) {
        info!("[{}] Disposing SSH bridge", self.connection_id);
        self.teardown().await;
        self.state.apply(LifecycleEvent::DisconnectRequested);
    }

    async fn retry_with_legacy(&mut self) -> Result<(), BridgeError> {
        let config = self
            .state
            .last_config
            .as_ref()
            .map(legacy_retry_config)
            .ok_or(BridgeError::NoPriorConnection)?;

        info!(
            "[{}] Retrying {}:{} with legacy algorithms",
            self.connection_id, config.host, config.port
        );
        self.output("\r\nRetrying connection with legacy algorithms for older network devices...\r\n")
            .await;
        self.start_connect(config).await;
        Ok(())
    }

    pub fn snapshot(&self) -> DiagnosticSnapshot {
        DiagnosticSnapshot::capture(SnapshotSource {
            connection_id: &self.connection_id,
            session_id: &self.session_id,
            status: self.state.status(),
            transport_mode: self.state.transport_mode(),
            dimensions: self.state.dimensions,
            bytes_sent: self.state.bytes_sent(),
            bytes_received: self.state.bytes_received(),
            history: &self.history,
            last_config: self.state.last_config.as_ref(),
            default_auth_methods: &self.settings.default_auth_methods,
        })
    }

    async fn send_diagnostics(&mut self) {
        let snapshot = self.snapshot();
        info!(
            "[{}] Diagnostics: status {}, sent {} bytes, received {} bytes",
            self.connection_id, snapshot.status, snapshot.bytes_sent, snapshot.bytes_received
        );
        let text = snapshot.render();
        self.emit(OutboundMessage::Diagnostic(Box::new(snapshot)))
            .await;
        self.output(text).await;
    }

    /// Handle an event from one of the bridge's background tasks.
    pub async fn handle_event(&mut self, event: BridgeEvent) {
        if event.attempt() != self.attempt {
            debug!(
                "[{}] Dropping stale {} event from attempt {}",
                self.connection_id,
                event.kind(),
                event.attempt()
            );
            discard(event);
            return;
        }

        match event {
            BridgeEvent::Banner { text, .. } => self.output(text).await,
            BridgeEvent::Ready { transport, .. } => self.on_ready(transport).await,
            BridgeEvent::ConnectFailed { error, .. } => self.on_connect_failed(error).await,
            BridgeEvent::ChannelOpened {
                mode, pty, channel, ..
            } => self.on_channel_opened(mode, pty, channel).await,
            BridgeEvent::ChannelFailed { mode, error, .. } => {
                self.on_channel_failed(mode, error).await
            }
            BridgeEvent::ChannelOutput {
                channel, output, ..
            } => self.on_channel_output(channel, output).await,
            BridgeEvent::TransportClosed { .. } => self.on_transport_closed().await,
        }
    }

    async fn on_ready(&mut self, transport: Arc<dyn Transport>) {
        self.connect_task = None;
        if self.state.apply(LifecycleEvent::Ready).is_none() {
            warn!(
                "[{}] Transport ready while {}, closing it",
                self.connection_id,
                self.state.status()
            );
            transport.end().await;
            return;
        }

        info!("[{}] SSH connection established", self.connection_id);
        self.transport = Some(transport.clone());

        self.output("\r\nSSH handshake complete. Negotiated secure connection.\r\n")
            .await;
        if let Some(algorithms) = self.offered.clone() {
            self.emit(OutboundMessage::Metadata(MetadataPayload { algorithms }))
                .await;
        }
        self.emit(OutboundMessage::status(
            ConnectionStatus::Connected,
            "Connection established",
        ))
        .await;
        self.output("\r\nConnection established. Opening terminal...\r\n")
            .await;

        let events = self.events_tx.clone();
        let attempt = self.attempt;
        let watched = transport.clone();
        self.close_watcher = Some(tokio::spawn(async move {
            watched.closed().await;
            let _ = events.send(BridgeEvent::TransportClosed { attempt }).await;
        }));

        self.state.apply_mode(ModeEvent::ShellAttempt);
        self.output("\r\nOpening shell session...\r\n").await;
        let pty = self.pty_request(&self.settings.shell_term);
        self.spawn_channel_open(transport, TransportMode::Shell, pty);
    }

    fn pty_request(&self, term: &str) -> PtyRequest {
        PtyRequest {
            term: term.to_string(),
            cols: self.state.dimensions.cols,
            rows: self.state.dimensions.rows,
        }
    }

    fn spawn_channel_open(&self, transport: Arc<dyn Transport>, mode: TransportMode, pty: PtyRequest) {
        let events = self.events_tx.clone();
        let attempt = self.attempt;
        let command = self.settings.pager_disable_command.clone();

        tokio::spawn(async move {
            let result = match mode {
                TransportMode::Exec => transport.open_exec(&pty, &command).await,
                _ => transport.open_shell(&pty).await,
            };
            let event = match result {
                Ok(channel) => BridgeEvent::ChannelOpened {
                    attempt,
                    mode,
                    pty,
                    channel,
                },
                Err(error) => BridgeEvent::ChannelFailed {
                    attempt,
                    mode,
                    error,
                },
            };
            let _ = events.send(event).await;
        });
    }

    async fn on_connect_failed(&mut self, err: SshError) {
        self.connect_task = None;
        let message = err.to_string();
        error!("[{}] SSH connection error: {}", self.connection_id, message);

        if err.is_authentication_related() {
            let config = self.state.last_config.as_ref();
            let methods: Vec<&str> = config
                .map(|c| c.resolved_auth_methods(&self.settings.default_auth_methods))
                .unwrap_or_default()
                .iter()
                .map(|m| m.as_str())
                .collect();
            warn!(
                "[{}] Authentication failure (password provided: {}, methods tried: {})",
                self.connection_id,
                if config.is_some_and(ConnectionConfig::has_password) { "yes" } else { "no" },
                methods.join(", ")
            );
        }

        self.state.apply(LifecycleEvent::Failed);
        self.emit(OutboundMessage::status(
            ConnectionStatus::Error,
            format!("Connection error: {}", message),
        ))
        .await;
        self.output(format!("\r\nConnection error: {}\r\n", message))
            .await;
    }

    async fn on_channel_opened(&mut self, mode: TransportMode, pty: PtyRequest, channel: ChannelHandle) {
        if self.state.status() != ConnectionStatus::Connected || self.transport.is_none() {
            debug!("[{}] Channel opened after teardown, closing it", self.connection_id);
            let _ = channel.cmd_tx.try_send(SessionCommand::Close);
            return;
        }

        self.channel_seq += 1;
        let seq = self.channel_seq;
        let ChannelHandle { cmd_tx, output_rx } = channel;
        let pump = spawn_pump(output_rx, self.events_tx.clone(), self.attempt, seq);
        self.channel = Some(ActiveChannel {
            seq,
            cmd_tx,
            pump,
            stdout: UTF_8.new_decoder_without_bom_handling(),
            stderr: UTF_8.new_decoder_without_bom_handling(),
        });

        match mode {
            TransportMode::Exec => {
                info!("[{}] Exec terminal opened", self.connection_id);
                self.emit(OutboundMessage::status(
                    ConnectionStatus::Connected,
                    "Connected (exec terminal)",
                ))
                .await;
                self.output("\r\nTerminal session opened using exec channel\r\n")
                    .await;
            }
            _ => {
                info!(
                    "[{}] Shell session opened ({}x{})",
                    self.connection_id, pty.cols, pty.rows
                );
                self.output(format!(
                    "\r\nShell session opened ({}x{})\r\n",
                    pty.cols, pty.rows
                ))
                .await;
                self.emit(OutboundMessage::status(
                    ConnectionStatus::Connected,
                    "Connected (shell)",
                ))
                .await;
            }
        }

        // resized while the channel was opening
        let dimensions = self.state.dimensions;
        if dimensions.cols != pty.cols || dimensions.rows != pty.rows {
            self.send_to_channel(SessionCommand::Resize(dimensions.cols, dimensions.rows))
                .await;
        }
    }

    async fn on_channel_failed(&mut self, mode: TransportMode, err: SshError) {
        match mode {
            TransportMode::Exec => {
                error!("[{}] Exec terminal failed: {}", self.connection_id, err);
                let message = format!("Failed to open exec terminal: {}", err);
                self.output(format!("\r\n{}\r\n", message)).await;
                self.emit(OutboundMessage::error(message)).await;
            }
            _ if err.is_shell_unsupported()
                && self.state.transport_mode() == TransportMode::Shell =>
            {
                warn!(
                    "[{}] Shell not supported ({}), falling back to exec channel",
                    self.connection_id, err
                );
                self.state.apply_mode(ModeEvent::ShellUnsupported);
                self.output(FALLBACK_NOTICE).await;
                if let Some(transport) = self.transport.clone() {
                    let pty = self.pty_request(&self.settings.exec_term);
                    self.spawn_channel_open(transport, TransportMode::Exec, pty);
                }
            }
            _ => {
                error!("[{}] Shell open failed: {}", self.connection_id, err);
                let message = format!("Failed to open shell: {}", err);
                self.emit(OutboundMessage::error(message.clone())).await;
                self.output(format!("\r\n{}\r\n", message)).await;
            }
        }
    }

    async fn on_channel_output(&mut self, seq: u64, output: ChannelOutput) {
        let Some(active) = self.channel.as_mut().filter(|c| c.seq == seq) else {
            debug!("[{}] Dropping output from channel {}", self.connection_id, seq);
            return;
        };

        match output {
            ChannelOutput::Data(bytes) => {
                let text = decode_chunk(&mut active.stdout, &bytes, false);
                self.state.record_received(bytes.len());
                self.forward_output(text).await;
            }
            ChannelOutput::ExtendedData(bytes) => {
                let text = decode_chunk(&mut active.stderr, &bytes, false);
                self.state.record_received(bytes.len());
                self.forward_output(text).await;
            }
            ChannelOutput::ExitStatus(code) => {
                info!("[{}] Remote command exited with {}", self.connection_id, code);
            }
            ChannelOutput::Closed => self.on_channel_closed().await,
        }
    }

    async fn forward_output(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        self.history.push(&text);
        self.output(text).await;
    }

    async fn on_channel_closed(&mut self) {
        let Some(mut active) = self.channel.take() else {
            return;
        };
        let mut tail = decode_chunk(&mut active.stdout, &[], true);
        tail.push_str(&decode_chunk(&mut active.stderr, &[], true));
        active.close();
        self.forward_output(tail).await;

        let stats = format!(
            "Communication stats - Sent: {} bytes, Received: {} bytes",
            self.state.bytes_sent(),
            self.state.bytes_received()
        );
        info!("[{}] Shell session closed. {}", self.connection_id, stats);
        self.output("\r\nShell session closed.\r\n").await;
        self.output(format!("{}\r\n", stats)).await;

        self.close_connection().await;
    }

    async fn on_transport_closed(&mut self) {
        self.close_watcher = None;
        info!("[{}] SSH connection closed", self.connection_id);
        self.output("\r\nConnection closed.\r\n").await;
        self.close_connection().await;
    }

    async fn close_connection(&mut self) {
        self.teardown().await;
        if self.state.apply(LifecycleEvent::Closed).is_some() {
            self.emit(OutboundMessage::status(
                ConnectionStatus::Disconnected,
                "Connection closed",
            ))
            .await;
        }
    }
}

/// Release resources carried by an event that arrived too late.
fn discard(event: BridgeEvent) {
    match event {
        BridgeEvent::Ready { transport, .. } => {
            tokio::spawn(async move { transport.end().await });
        }
        BridgeEvent::ChannelOpened { channel, .. } => {
            let _ = channel.cmd_tx.try_send(SessionCommand::Close);
        }
        _ => {}
    }
}
