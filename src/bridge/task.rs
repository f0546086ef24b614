//! Bridge task
//!
//! Each bridge runs on its own task and is reached through a cloneable
//! [`BridgeHandle`]. Inbound messages and background events are handled one
//! at a time, in arrival order.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use super::diagnostics::DiagnosticSnapshot;
use super::emitter::DisplaySurface;
use super::manager::{SshBridge, EVENT_QUEUE};
use crate::config::BridgeSettings;
use crate::protocol::InboundMessage;
use crate::ssh::{ConnectionConfig, Connector};

enum BridgeInput {
    Raw(Value),
    Message(InboundMessage),
    Snapshot(oneshot::Sender<DiagnosticSnapshot>),
    Shutdown,
}

/// Handle to a running bridge task
#[derive(Clone)]
pub struct BridgeHandle {
    connection_id: String,
    session_id: String,
    tx: mpsc::UnboundedSender<BridgeInput>,
}

impl BridgeHandle {
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Queue a raw message from the display surface.
    pub fn send(&self, message: Value) -> bool {
        self.tx.send(BridgeInput::Raw(message)).is_ok()
    }

    /// Queue an already-decoded message.
    pub fn dispatch(&self, message: InboundMessage) -> bool {
        self.tx.send(BridgeInput::Message(message)).is_ok()
    }

    pub fn connect(&self, config: ConnectionConfig) -> bool {
        self.dispatch(InboundMessage::Connect {
            config: Some(config),
        })
    }

    /// Current diagnostic snapshot, without emitting anything.
    pub async fn snapshot(&self) -> Option<DiagnosticSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(BridgeInput::Snapshot(reply_tx)).ok()?;
        reply_rx.await.ok()
    }

    /// Release the connection and stop the task. Messages queued before
    /// this call are still handled.
    pub fn shutdown(&self) {
        let _ = self.tx.send(BridgeInput::Shutdown);
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Spawn a bridge task for one terminal connection.
pub fn spawn_bridge(
    connection_id: String,
    session_id: String,
    surface: Arc<dyn DisplaySurface>,
    connector: Arc<dyn Connector>,
    settings: Arc<BridgeSettings>,
) -> BridgeHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (events_tx, mut events_rx) = mpsc::channel(EVENT_QUEUE);
    let handle = BridgeHandle {
        connection_id: connection_id.clone(),
        session_id: session_id.clone(),
        tx,
    };

    tokio::spawn(async move {
        let mut bridge = SshBridge::new(
            connection_id,
            session_id,
            surface,
            connector,
            settings,
            events_tx,
        )
        .await;

        loop {
            tokio::select! {
                input = rx.recv() => match input {
                    Some(BridgeInput::Raw(message)) => bridge.handle_message(message).await,
                    Some(BridgeInput::Message(message)) => bridge.handle_inbound(message).await,
                    Some(BridgeInput::Snapshot(reply_tx)) => {
                        let _ = reply_tx.send(bridge.snapshot());
                    }
                    Some(BridgeInput::Shutdown) | None => {
                        bridge.dispose().await;
                        break;
                    }
                },
                Some(event) = events_rx.recv() => bridge.handle_event(event).await,
            }
        }

        info!("Bridge task for {} stopped", bridge.connection_id());
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ConnectionStatus;
    use crate::testing::{
        eventually, ConnectOutcome, MockConnector, MockTransport, RecordingSurface, ShellBehavior,
    };
    use serde_json::json;

    fn spawn(
        connector: Arc<MockConnector>,
    ) -> (BridgeHandle, Arc<RecordingSurface>) {
        let surface = Arc::new(RecordingSurface::new());
        let handle = spawn_bridge(
            "conn-1".to_string(),
            "session-1".to_string(),
            surface.clone(),
            connector,
            Arc::new(BridgeSettings::default()),
        );
        (handle, surface)
    }

    #[tokio::test]
    async fn test_task_runs_connect_flow() {
        let transport = MockTransport::new(ShellBehavior::Open);
        let connector = MockConnector::new(vec![ConnectOutcome::Ready(transport.clone())]);
        let (handle, surface) = spawn(connector);

        assert!(handle.send(json!({
            "type": "connect",
            "payload": {"connectionConfig": {"host": "10.0.0.5", "username": "admin"}}
        })));

        assert!(eventually(|| surface.output_text().contains("Shell session opened")).await);
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.status, ConnectionStatus::Connected);
        assert_eq!(snapshot.connection_id, "conn-1");
    }

    #[tokio::test]
    async fn test_shutdown_ends_transport_and_stops() {
        let transport = MockTransport::new(ShellBehavior::Open);
        let connector = MockConnector::new(vec![ConnectOutcome::Ready(transport.clone())]);
        let (handle, surface) = spawn(connector);

        handle.connect(crate::ssh::ConnectionConfig::new("10.0.0.5", 22, "admin"));
        assert!(eventually(|| surface.output_text().contains("Shell session opened")).await);

        handle.shutdown();
        assert!(eventually(|| !handle.is_running()).await);
        assert_eq!(transport.end_calls(), 1);
        assert!(handle.snapshot().await.is_none());
    }
}
