//! Inbound message decoding (display surface / host → bridge)
//!
//! Both the typed shape `{type, payload, connectionId?}` and the legacy flat
//! shape `{command, data | cols/rows | config}` decode into one
//! [`InboundMessage`]; nothing past this module sees raw JSON.

use serde_json::Value;
use thiserror::Error;

use crate::ssh::ConnectionConfig;

/// Terminal size as sent by the display surface, not yet validated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: i64,
    pub rows: i64,
}

#[derive(Debug, Clone)]
pub enum InboundMessage {
    Init { size: Option<TerminalSize> },
    /// `None` when the request carried no connection config
    Connect { config: Option<ConnectionConfig> },
    Input { data: Option<String> },
    Resize(TerminalSize),
    Disconnect,
    Ping,
    Diagnostic,
    RetryWithLegacy,
    /// Unrecognised type, kept for logging
    Unknown(String),
}

impl InboundMessage {
    pub fn kind(&self) -> &str {
        match self {
            Self::Init { .. } => "init",
            Self::Connect { .. } => "connect",
            Self::Input { .. } => "input",
            Self::Resize(_) => "resize",
            Self::Disconnect => "disconnect",
            Self::Ping => "ping",
            Self::Diagnostic => "diagnostic",
            Self::RetryWithLegacy => "retry-with-legacy",
            Self::Unknown(kind) => kind,
        }
    }
}

/// Result of decoding one raw inbound value
#[derive(Debug, Clone)]
pub enum Decoded {
    Message(InboundMessage),
    /// Addressed to a different connection
    Foreign { connection_id: String },
    /// Recognised but carries nothing to do (legacy `output` echo, ...)
    Ignored(&'static str),
    /// Neither typed nor legacy shape
    Invalid,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid connection config: {0}")]
    InvalidConfig(#[from] serde_json::Error),
}

fn int_field(value: &Value, key: &str) -> i64 {
    match value.get(key) {
        Some(v) => v
            .as_i64()
            .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .unwrap_or(0),
        None => 0,
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn size_of(value: &Value) -> TerminalSize {
    TerminalSize {
        cols: int_field(value, "cols"),
        rows: int_field(value, "rows"),
    }
}

fn config_of(value: Option<&Value>) -> Result<Option<ConnectionConfig>, DecodeError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
    }
}

/// Decode a raw inbound value for the connection `own_id`.
pub fn decode(value: &Value, own_id: &str) -> Result<Decoded, DecodeError> {
    if let Some(id) = value.get("connectionId").and_then(Value::as_str) {
        if !id.is_empty() && id != own_id {
            return Ok(Decoded::Foreign {
                connection_id: id.to_string(),
            });
        }
    }

    match value.get("type").and_then(Value::as_str).filter(|t| !t.is_empty()) {
        Some(kind) => decode_typed(kind, value.get("payload").unwrap_or(&Value::Null)),
        None => match value.get("command").and_then(Value::as_str) {
            Some(command) => decode_legacy(command, value),
            None => Ok(Decoded::Invalid),
        },
    }
}

fn decode_typed(kind: &str, payload: &Value) -> Result<Decoded, DecodeError> {
    let message = match kind {
        "init" => InboundMessage::Init {
            size: payload.get("terminalDimensions").map(size_of),
        },
        "connect" => InboundMessage::Connect {
            config: config_of(payload.get("connectionConfig"))?,
        },
        "input" => InboundMessage::Input {
            data: string_field(payload, "data"),
        },
        "resize" => InboundMessage::Resize(size_of(payload)),
        "disconnect" => InboundMessage::Disconnect,
        "ping" => InboundMessage::Ping,
        "diagnostic" => InboundMessage::Diagnostic,
        "retry-with-legacy" => InboundMessage::RetryWithLegacy,
        other => InboundMessage::Unknown(other.to_string()),
    };
    Ok(Decoded::Message(message))
}

fn decode_legacy(command: &str, value: &Value) -> Result<Decoded, DecodeError> {
    let message = match command {
        "output" => return Ok(Decoded::Ignored("legacy output echo")),
        "input" => InboundMessage::Input {
            data: string_field(value, "data"),
        },
        "resize" => {
            let size = size_of(value);
            if size.cols == 0 || size.rows == 0 {
                return Ok(Decoded::Ignored("legacy resize without dimensions"));
            }
            InboundMessage::Resize(size)
        }
        "connect" => match config_of(value.get("config"))? {
            Some(config) => InboundMessage::Connect {
                config: Some(config),
            },
            None => return Ok(Decoded::Ignored("legacy connect without config")),
        },
        "disconnect" => InboundMessage::Disconnect,
        other => InboundMessage::Unknown(other.to_string()),
    };
    Ok(Decoded::Message(message))
}
