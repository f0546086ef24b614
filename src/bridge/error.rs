//! Bridge error taxonomy
//!
//! Every variant ends up as an envelope (or a log line); none crosses
//! `SshBridge::handle_message`.

use thiserror::Error;

use super::state::ConnectionStatus;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// `connect` without a usable connection config
    #[error("Missing connection parameters")]
    MissingParameters,

    /// Payload present but malformed
    #[error("Failed to process command: {0}")]
    InvalidParameters(String),

    /// `retry-with-legacy` before any `connect`
    #[error("No previous connection to retry")]
    NoPriorConnection,

    /// `input` while no live channel exists
    #[error("Cannot send data, channel {}, status: {status}", presence(.channel_exists))]
    ChannelUnavailable {
        channel_exists: bool,
        status: ConnectionStatus,
    },

    /// Non-positive resize values; logged only
    #[error("Invalid dimensions: {cols}x{rows}")]
    InvalidDimensions { cols: i64, rows: i64 },
}

fn presence(exists: &bool) -> &'static str {
    if *exists {
        "exists"
    } else {
        "does not exist"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_unavailable_message() {
        let e = BridgeError::ChannelUnavailable {
            channel_exists: false,
            status: ConnectionStatus::Disconnected,
        };
        assert_eq!(
            e.to_string(),
            "Cannot send data, channel does not exist, status: disconnected"
        );
    }
}
