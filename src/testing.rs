//! In-memory fakes for bridge and router tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::bridge::emitter::{DisplaySurface, SurfaceError};
use crate::bridge::manager::{BridgeEvent, SshBridge, EVENT_QUEUE};
use crate::bridge::ConnectionStatus;
use crate::config::BridgeSettings;
use crate::protocol::{Envelope, OutboundMessage};
use crate::ssh::{
    ChannelEnd, ChannelHandle, ConnectRequest, Connector, PtyRequest, SshError, Transport,
};

/// Display surface that records every envelope
#[derive(Default)]
pub struct RecordingSurface {
    sent: Mutex<Vec<Envelope>>,
    fail: AtomicBool,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_posts(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.sent.lock().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|e| e.message.kind() == kind)
            .count()
    }

    pub fn outputs(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|e| match &e.message {
                OutboundMessage::Output { data } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn output_text(&self) -> String {
        self.outputs().concat()
    }

    pub fn statuses(&self) -> Vec<(ConnectionStatus, String)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|e| match &e.message {
                OutboundMessage::ConnectionStatus { status, message } => {
                    Some((*status, message.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|e| match &e.message {
                OutboundMessage::Error { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}

impl DisplaySurface for RecordingSurface {
    fn post_message(&self, envelope: &Envelope) -> Result<(), SurfaceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SurfaceError::Rejected("test surface rejects posts".to_string()));
        }
        self.sent.lock().push(envelope.clone());
        Ok(())
    }
}

/// How a [`MockTransport`] answers a shell request
#[derive(Debug, Clone, Copy)]
pub enum ShellBehavior {
    Open,
    /// Network-device style refusal that triggers the exec fallback
    Unsupported,
    Fail(&'static str),
}

pub struct MockTransport {
    shell: ShellBehavior,
    exec_fails: bool,
    end_calls: AtomicUsize,
    ptys: Mutex<Vec<PtyRequest>>,
    exec_commands: Mutex<Vec<String>>,
    channels: Mutex<VecDeque<ChannelEnd>>,
    closed_tx: watch::Sender<bool>,
}

impl MockTransport {
    pub fn new(shell: ShellBehavior) -> Arc<Self> {
        Arc::new(Self::build(shell, false))
    }

    pub fn with_failing_exec(shell: ShellBehavior) -> Arc<Self> {
        Arc::new(Self::build(shell, true))
    }

    fn build(shell: ShellBehavior, exec_fails: bool) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            shell,
            exec_fails,
            end_calls: AtomicUsize::new(0),
            ptys: Mutex::new(Vec::new()),
            exec_commands: Mutex::new(Vec::new()),
            channels: Mutex::new(VecDeque::new()),
            closed_tx,
        }
    }

    pub fn end_calls(&self) -> usize {
        self.end_calls.load(Ordering::SeqCst)
    }

    pub fn ptys(&self) -> Vec<PtyRequest> {
        self.ptys.lock().clone()
    }

    pub fn exec_commands(&self) -> Vec<String> {
        self.exec_commands.lock().clone()
    }

    /// Remote end of the oldest opened channel.
    pub fn take_channel(&self) -> Option<ChannelEnd> {
        self.channels.lock().pop_front()
    }

    /// Simulate the server going away.
    pub fn drop_connection(&self) {
        self.closed_tx.send_replace(true);
    }

    fn open_channel(&self) -> ChannelHandle {
        let (handle, end) = ChannelHandle::pair();
        self.channels.lock().push_back(end);
        handle
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_shell(&self, pty: &PtyRequest) -> Result<ChannelHandle, SshError> {
        self.ptys.lock().push(pty.clone());
        match self.shell {
            ShellBehavior::Open => Ok(self.open_channel()),
            ShellBehavior::Unsupported => Err(SshError::ProtocolError(
                "Protocol error: expected packet type 5, got 90".to_string(),
            )),
            ShellBehavior::Fail(reason) => Err(SshError::ChannelError(reason.to_string())),
        }
    }

    async fn open_exec(&self, pty: &PtyRequest, command: &str) -> Result<ChannelHandle, SshError> {
        self.ptys.lock().push(pty.clone());
        self.exec_commands.lock().push(command.to_string());
        if self.exec_fails {
            return Err(SshError::ChannelError("exec request refused".to_string()));
        }
        Ok(self.open_channel())
    }

    async fn end(&self) {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
        self.closed_tx.send_replace(true);
    }

    async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// Scripted result of one connect call
#[derive(Clone)]
pub enum ConnectOutcome {
    Ready(Arc<MockTransport>),
    Fail(String),
    /// Never resolves
    Hang,
}

pub struct MockConnector {
    /// Consumed front to back; the last outcome repeats
    outcomes: Mutex<VecDeque<ConnectOutcome>>,
    banners: Vec<String>,
    requests: Mutex<Vec<ConnectRequest>>,
}

impl MockConnector {
    pub fn new(outcomes: Vec<ConnectOutcome>) -> Arc<Self> {
        Self::with_banners(outcomes, Vec::new())
    }

    pub fn with_banners(outcomes: Vec<ConnectOutcome>, banners: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            banners,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn connect_calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.requests.lock().clone()
    }

    fn next_outcome(&self) -> ConnectOutcome {
        let mut outcomes = self.outcomes.lock();
        if outcomes.len() > 1 {
            outcomes.pop_front().unwrap_or(ConnectOutcome::Hang)
        } else {
            outcomes.front().cloned().unwrap_or(ConnectOutcome::Hang)
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<Arc<dyn Transport>, SshError> {
        if let Some(tx) = &request.banner_tx {
            for banner in &self.banners {
                let _ = tx.send(banner.clone());
            }
        }
        self.requests.lock().push(request);

        match self.next_outcome() {
            ConnectOutcome::Ready(transport) => Ok(transport as Arc<dyn Transport>),
            ConnectOutcome::Fail(message) => Err(SshError::ConnectionFailed(message)),
            ConnectOutcome::Hang => std::future::pending().await,
        }
    }
}

/// Bridge over a recording surface, with its event queue exposed.
pub async fn new_bridge(
    connector: Arc<MockConnector>,
) -> (
    SshBridge,
    Arc<RecordingSurface>,
    mpsc::Receiver<BridgeEvent>,
) {
    let surface = Arc::new(RecordingSurface::new());
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
    let bridge = SshBridge::new(
        "conn-1",
        "session-1",
        surface.clone(),
        connector,
        Arc::new(BridgeSettings::default()),
        events_tx,
    )
    .await;
    (bridge, surface, events_rx)
}

/// Feed background events to the bridge until none arrive for a while.
pub async fn settle(bridge: &mut SshBridge, events: &mut mpsc::Receiver<BridgeEvent>) {
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(50), events.recv()).await
    {
        bridge.handle_event(event).await;
    }
}

/// Poll `condition` until it holds or a second passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
