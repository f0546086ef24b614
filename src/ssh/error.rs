//! SSH Error types

use thiserror::Error;

/// Text signatures of a server that refuses interactive shell channels
/// (network-device firmware answering a shell request with a bogus packet).
const SHELL_UNSUPPORTED_SIGNATURES: &[&str] = &["expected packet type 5, got 90", "Protocol error"];

#[derive(Error, Debug)]
pub enum SshError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Server rejected the shell request on an otherwise healthy channel
    #[error("Shell request rejected by server: {0}")]
    ShellUnsupported(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Disconnected")]
    Disconnected,
}

impl SshError {
    /// Whether a shell-open failure should fall back to an exec channel.
    pub fn is_shell_unsupported(&self) -> bool {
        match self {
            SshError::ShellUnsupported(_) => true,
            other => {
                let text = other.to_string();
                SHELL_UNSUPPORTED_SIGNATURES
                    .iter()
                    .any(|sig| text.contains(sig))
            }
        }
    }

    /// Whether the failure text points at authentication.
    pub fn is_authentication_related(&self) -> bool {
        matches!(self, SshError::AuthenticationFailed(_)) || mentions_authentication(&self.to_string())
    }
}

/// Case-insensitive `auth` / `authentication` substring match.
pub fn mentions_authentication(message: &str) -> bool {
    message.to_ascii_lowercase().contains("auth")
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::ProtocolError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_unsupported_classification() {
        assert!(SshError::ShellUnsupported("failure".into()).is_shell_unsupported());
        assert!(SshError::ChannelError("expected packet type 5, got 90".into())
            .is_shell_unsupported());
        assert!(SshError::ProtocolError("Protocol error: bad reply".into()).is_shell_unsupported());
        assert!(!SshError::ChannelError("window too small".into()).is_shell_unsupported());
        assert!(!SshError::Disconnected.is_shell_unsupported());
    }

    #[test]
    fn test_authentication_classification() {
        assert!(SshError::AuthenticationFailed("rejected".into()).is_authentication_related());
        assert!(SshError::ConnectionFailed("All configured AUTH methods failed".into())
            .is_authentication_related());
        assert!(!SshError::Timeout("ready timeout".into()).is_authentication_related());
    }
}
