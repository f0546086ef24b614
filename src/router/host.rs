//! Host message router
//!
//! The host (editor panel, stdio driver) owns display surfaces and sessions;
//! this router owns the bridges behind them. Inbound host messages are
//! stamped with their connection id and delivered to exactly one bridge.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::registry::{ConnectionRegistry, RegistryError};
use crate::bridge::{spawn_bridge, DisplaySurface};
use crate::config::BridgeSettings;
use crate::protocol::InboundMessage;
use crate::ssh::{ConnectionConfig, Connector};

/// Events the host sends to the router
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostEvent {
    /// A display surface was opened for `session_id`
    #[serde(rename_all = "camelCase")]
    Open {
        session_id: String,
        #[serde(default)]
        connection_id: Option<String>,
        #[serde(default)]
        config: Option<ConnectionConfig>,
    },
    /// Raw message from a display surface
    #[serde(rename_all = "camelCase")]
    Message {
        connection_id: String,
        message: Value,
    },
    /// The display surface went away
    #[serde(rename_all = "camelCase")]
    Close { connection_id: String },
    #[serde(rename_all = "camelCase")]
    Disconnect { connection_id: String },
    DisconnectAll,
    #[serde(rename_all = "camelCase")]
    Diagnostic { connection_id: String },
    #[serde(rename_all = "camelCase")]
    Query { session_id: String },
}

/// Router replies to the host (bridge envelopes travel separately)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostReply {
    #[serde(rename_all = "camelCase")]
    Opened {
        connection_id: String,
        session_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Disconnected { count: usize },
    #[serde(rename_all = "camelCase")]
    Session {
        session_id: String,
        has_terminal_open: bool,
        connection_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        connection_id: Option<String>,
        message: String,
    },
}

pub struct HostMessageRouter {
    registry: Arc<ConnectionRegistry>,
    connector: Arc<dyn Connector>,
    settings: Arc<BridgeSettings>,
}

impl HostMessageRouter {
    pub fn new(connector: Arc<dyn Connector>, settings: Arc<BridgeSettings>) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            connector,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Open a terminal under a fresh connection id.
    pub fn open_terminal(
        &self,
        session_id: &str,
        surface: Arc<dyn DisplaySurface>,
        config: Option<ConnectionConfig>,
    ) -> Result<String, RegistryError> {
        self.open_terminal_with_id(Uuid::new_v4().to_string(), session_id, surface, config)
    }

    /// Open a terminal under a caller-chosen connection id.
    ///
    /// `config`, when given, is connected once the surface reports `init`.
    pub fn open_terminal_with_id(
        &self,
        connection_id: String,
        session_id: &str,
        surface: Arc<dyn DisplaySurface>,
        config: Option<ConnectionConfig>,
    ) -> Result<String, RegistryError> {
        if self.registry.contains(&connection_id) {
            return Err(RegistryError::DuplicateConnection(connection_id));
        }

        let handle = spawn_bridge(
            connection_id.clone(),
            session_id.to_string(),
            surface,
            self.connector.clone(),
            self.settings.clone(),
        );
        if let Err(e) = self.registry.insert(handle.clone(), config) {
            handle.shutdown();
            return Err(e);
        }

        info!(
            "Opened terminal {} for session {}",
            connection_id, session_id
        );
        Ok(connection_id)
    }

    /// Deliver a raw display-surface message to its bridge.
    pub fn on_message(&self, connection_id: &str, mut message: Value) -> Result<(), RegistryError> {
        let handle = self.registry.get(connection_id)?;

        if let Some(fields) = message.as_object_mut() {
            let addressed = fields
                .get("connectionId")
                .and_then(Value::as_str)
                .map(str::to_string);
            match addressed.as_deref() {
                Some(id) if !id.is_empty() && id != connection_id => {
                    debug!(
                        "Dropping message for {} received on {}",
                        id, connection_id
                    );
                    return Ok(());
                }
                Some(id) if !id.is_empty() => {}
                _ => {
                    fields.insert(
                        "connectionId".to_string(),
                        Value::String(connection_id.to_string()),
                    );
                }
            }
        }

        let is_init = message.get("type").and_then(Value::as_str) == Some("init");
        handle.send(message);

        if is_init {
            if let Some(config) = self.registry.take_pending_config(connection_id) {
                info!(
                    "Terminal {} initialized, connecting to {}:{}",
                    connection_id, config.host, config.port
                );
                handle.connect(config);
            }
        }
        Ok(())
    }

    /// The display surface closed: release its bridge.
    pub fn on_close(&self, connection_id: &str) -> bool {
        self.registry.dispose(connection_id)
    }

    /// Disconnect a terminal's SSH session and dispose of its bridge.
    pub fn disconnect_terminal(&self, connection_id: &str) -> Result<(), RegistryError> {
        let handle = self.registry.get(connection_id)?;
        handle.dispatch(InboundMessage::Disconnect);
        self.registry.dispose(connection_id);
        Ok(())
    }

    /// Disconnect every terminal; returns how many were open.
    pub fn disconnect_all(&self) -> usize {
        let ids = self.registry.connection_ids();
        info!("Disconnecting {} terminal(s)", ids.len());
        ids.iter()
            .filter(|id| self.disconnect_terminal(id).is_ok())
            .count()
    }

    pub fn has_terminal_open(&self, session_id: &str) -> bool {
        self.registry.has_terminal_open(session_id)
    }

    pub fn connections_for_session(&self, session_id: &str) -> Vec<String> {
        self.registry.connections_for_session(session_id)
    }

    pub fn send_diagnostic_request(&self, connection_id: &str) -> Result<(), RegistryError> {
        self.registry
            .get(connection_id)?
            .dispatch(InboundMessage::Diagnostic);
        Ok(())
    }

    /// Apply one host event. `surface` receives the envelopes of any
    /// terminal opened by it.
    pub fn handle_host_event(
        &self,
        event: HostEvent,
        surface: Arc<dyn DisplaySurface>,
    ) -> Option<HostReply> {
        let result = match event {
            HostEvent::Open {
                session_id,
                connection_id,
                config,
            } => {
                let opened = match connection_id {
                    Some(id) => self.open_terminal_with_id(id, &session_id, surface, config),
                    None => self.open_terminal(&session_id, surface, config),
                };
                return Some(match opened {
                    Ok(connection_id) => HostReply::Opened {
                        connection_id,
                        session_id,
                    },
                    Err(e) => HostReply::Error {
                        connection_id: None,
                        message: e.to_string(),
                    },
                });
            }
            HostEvent::Message {
                connection_id,
                message,
            } => self
                .on_message(&connection_id, message)
                .map_err(|e| (connection_id, e)),
            HostEvent::Close { connection_id } => {
                self.on_close(&connection_id);
                Ok(())
            }
            HostEvent::Disconnect { connection_id } => self
                .disconnect_terminal(&connection_id)
                .map_err(|e| (connection_id, e)),
            HostEvent::DisconnectAll => {
                return Some(HostReply::Disconnected {
                    count: self.disconnect_all(),
                })
            }
            HostEvent::Diagnostic { connection_id } => self
                .send_diagnostic_request(&connection_id)
                .map_err(|e| (connection_id, e)),
            HostEvent::Query { session_id } => {
                return Some(HostReply::Session {
                    has_terminal_open: self.has_terminal_open(&session_id),
                    connection_ids: self.connections_for_session(&session_id),
                    session_id,
                })
            }
        };

        match result {
            Ok(()) => None,
            Err((connection_id, e)) => {
                warn!("Host event for {} failed: {}", connection_id, e);
                Some(HostReply::Error {
                    connection_id: Some(connection_id),
                    message: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OutboundMessage;
    use crate::testing::{
        eventually, ConnectOutcome, MockConnector, MockTransport, RecordingSurface, ShellBehavior,
    };
    use serde_json::json;

    fn router(connector: Arc<MockConnector>) -> HostMessageRouter {
        HostMessageRouter::new(connector, Arc::new(BridgeSettings::default()))
    }

    fn pong_count(surface: &RecordingSurface) -> usize {
        surface
            .envelopes()
            .iter()
            .filter(|e| matches!(e.message, OutboundMessage::Pong { .. }))
            .count()
    }

    #[tokio::test]
    async fn test_init_triggers_pending_connect() {
        let transport = MockTransport::new(ShellBehavior::Open);
        let connector = MockConnector::new(vec![ConnectOutcome::Ready(transport.clone())]);
        let router = router(connector.clone());
        let surface = Arc::new(RecordingSurface::new());

        let id = router
            .open_terminal(
                "s1",
                surface.clone(),
                Some(ConnectionConfig::new("10.0.0.5", 22, "admin")),
            )
            .unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(connector.connect_calls(), 0);

        router
            .on_message(&id, json!({"type": "init", "payload": {"terminalDimensions": {"cols": 100, "rows": 30}}}))
            .unwrap();

        assert!(eventually(|| surface.output_text().contains("Shell session opened (100x30)")).await);
        assert_eq!(connector.connect_calls(), 1);
        assert!(surface.envelopes().iter().all(|e| e.connection_id == id));

        // a second init does not reconnect
        router.on_message(&id, json!({"type": "init"})).unwrap();
        assert!(eventually(|| surface.statuses().len() >= 6).await);
        assert_eq!(connector.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_messages_isolated_per_connection() {
        let router = router(MockConnector::new(vec![]));
        let first = Arc::new(RecordingSurface::new());
        let second = Arc::new(RecordingSurface::new());
        let a = router.open_terminal("s1", first.clone(), None).unwrap();
        let b = router.open_terminal("s1", second.clone(), None).unwrap();

        router.on_message(&a, json!({"type": "ping"})).unwrap();
        router
            .on_message(&a, json!({"type": "ping", "connectionId": b}))
            .unwrap();

        assert!(eventually(|| pong_count(&first) == 1).await);
        assert_eq!(pong_count(&second), 0);
        assert_eq!(router.connections_for_session("s1"), vec![a, b]);
    }

    #[tokio::test]
    async fn test_unknown_connection() {
        let router = router(MockConnector::new(vec![]));
        assert!(matches!(
            router.on_message("nope", json!({"type": "ping"})),
            Err(RegistryError::NotFound(_))
        ));
        assert!(router.send_diagnostic_request("nope").is_err());
        assert!(!router.on_close("nope"));
    }

    #[tokio::test]
    async fn test_close_releases_connection() {
        let transport = MockTransport::new(ShellBehavior::Open);
        let connector = MockConnector::new(vec![ConnectOutcome::Ready(transport.clone())]);
        let router = router(connector);
        let surface = Arc::new(RecordingSurface::new());

        let id = router
            .open_terminal("s1", surface.clone(), Some(ConnectionConfig::new("h", 22, "u")))
            .unwrap();
        router.on_message(&id, json!({"type": "init"})).unwrap();
        assert!(eventually(|| surface.output_text().contains("Shell session opened")).await);

        assert!(router.has_terminal_open("s1"));
        assert!(router.on_close(&id));
        assert!(!router.has_terminal_open("s1"));
        assert!(eventually(|| transport.end_calls() == 1).await);
    }

    #[tokio::test]
    async fn test_disconnect_all() {
        let first = MockTransport::new(ShellBehavior::Open);
        let second = MockTransport::new(ShellBehavior::Open);
        let connector = MockConnector::new(vec![
            ConnectOutcome::Ready(first.clone()),
            ConnectOutcome::Ready(second.clone()),
        ]);
        let router = router(connector);
        let surface = Arc::new(RecordingSurface::new());

        let a = router
            .open_terminal("s1", surface.clone(), Some(ConnectionConfig::new("h1", 22, "u")))
            .unwrap();
        router.on_message(&a, json!({"type": "init"})).unwrap();
        assert!(eventually(|| surface.output_text().contains("Shell session opened")).await);

        let b = router
            .open_terminal("s2", surface.clone(), Some(ConnectionConfig::new("h2", 22, "u")))
            .unwrap();
        router.on_message(&b, json!({"type": "init"})).unwrap();
        assert!(eventually(|| second.ptys().len() == 1).await);

        assert_eq!(router.disconnect_all(), 2);
        assert!(router.registry().is_empty());
        assert!(eventually(|| first.end_calls() == 1 && second.end_calls() == 1).await);
        assert!(eventually(|| surface.output_text().contains("Disconnecting from SSH session...")).await);
    }

    #[tokio::test]
    async fn test_host_events() {
        let router = router(MockConnector::new(vec![]));
        let surface: Arc<dyn DisplaySurface> = Arc::new(RecordingSurface::new());

        let open: HostEvent = serde_json::from_value(json!({
            "event": "open",
            "sessionId": "s1",
            "connectionId": "fixed-id",
            "config": {"host": "10.0.0.5", "username": "admin"}
        }))
        .unwrap();
        assert_eq!(
            router.handle_host_event(open.clone(), surface.clone()),
            Some(HostReply::Opened {
                connection_id: "fixed-id".to_string(),
                session_id: "s1".to_string()
            })
        );
        assert!(matches!(
            router.handle_host_event(open, surface.clone()),
            Some(HostReply::Error { .. })
        ));

        let query: HostEvent = serde_json::from_value(json!({"event": "query", "sessionId": "s1"})).unwrap();
        assert_eq!(
            router.handle_host_event(query, surface.clone()),
            Some(HostReply::Session {
                session_id: "s1".to_string(),
                has_terminal_open: true,
                connection_ids: vec!["fixed-id".to_string()],
            })
        );

        let missing: HostEvent =
            serde_json::from_value(json!({"event": "diagnostic", "connectionId": "other"})).unwrap();
        assert!(matches!(
            router.handle_host_event(missing, surface.clone()),
            Some(HostReply::Error { connection_id: Some(id), .. }) if id == "other"
        ));

        let close: HostEvent =
            serde_json::from_value(json!({"event": "close", "connectionId": "fixed-id"})).unwrap();
        assert_eq!(router.handle_host_event(close, surface), None);
        assert!(!router.has_terminal_open("s1"));
    }
}
