//! Wire envelope

use serde::Serialize;

use super::outbound::OutboundMessage;

/// Outbound wire message:
/// `{connectionId, sessionId, type, payload, timestamp}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub connection_id: String,
    pub session_id: String,
    /// `type` + `payload`
    #[serde(flatten)]
    pub message: OutboundMessage,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl Envelope {
    pub fn new(connection_id: &str, session_id: &str, message: OutboundMessage) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            session_id: session_id.to_string(),
            message,
            timestamp: now_millis(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
