//! Outbound message vocabulary (bridge → display surface)

use serde::Serialize;

use crate::bridge::diagnostics::DiagnosticSnapshot;
use crate::bridge::ConnectionStatus;
use crate::ssh::AlgorithmSet;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum OutboundMessage {
    /// Raw terminal text, one transport chunk per message
    Output { data: String },
    ConnectionStatus {
        status: ConnectionStatus,
        message: String,
    },
    Error { message: String },
    Metadata(MetadataPayload),
    Diagnostic(Box<DiagnosticSnapshot>),
    /// `time` is milliseconds since the Unix epoch
    Pong { time: i64, status: ConnectionStatus },
}

/// Connection facts published once the transport is ready
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPayload {
    /// Algorithm preferences offered during the handshake
    pub algorithms: AlgorithmSet,
}

impl OutboundMessage {
    pub fn output(data: impl Into<String>) -> Self {
        Self::Output { data: data.into() }
    }

    pub fn status(status: ConnectionStatus, message: impl Into<String>) -> Self {
        Self::ConnectionStatus {
            status,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire name of the message type
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Output { .. } => "output",
            Self::ConnectionStatus { .. } => "connectionStatus",
            Self::Error { .. } => "error",
            Self::Metadata(_) => "metadata",
            Self::Diagnostic(_) => "diagnostic",
            Self::Pong { .. } => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_adjacent_tagging() {
        let value = serde_json::to_value(OutboundMessage::Pong {
            time: 42,
            status: ConnectionStatus::Connected,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"type": "pong", "payload": {"time": 42, "status": "connected"}})
        );
    }

    #[test]
    fn test_kind_matches_wire_tag() {
        let messages = [
            OutboundMessage::output("x"),
            OutboundMessage::status(ConnectionStatus::Error, "boom"),
            OutboundMessage::error("bad"),
        ];
        for message in messages {
            let value = serde_json::to_value(&message).unwrap();
            assert_eq!(value["type"], message.kind());
        }
    }
}
