//! Bridge settings
//!
//! Tunables shared by every bridge in the process. All fields default, so a
//! partial (or empty) settings file is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ssh::{AuthMethodKind, PromptPolicy};

/// Current settings schema version
pub const SETTINGS_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    pub version: u32,

    /// Deadline for TCP connect + handshake + authentication
    pub ready_timeout_secs: u64,

    /// SSH keepalive probe interval
    pub keepalive_interval_secs: u64,

    /// Missed keepalives tolerated before the transport closes
    pub keepalive_max: usize,

    /// Auth order used when a connection config does not name one
    pub default_auth_methods: Vec<AuthMethodKind>,

    /// TERM for the interactive shell PTY
    pub shell_term: String,

    /// TERM for the exec fallback PTY
    pub exec_term: String,

    /// Command issued on the exec fallback channel
    pub pager_disable_command: String,

    pub output_throttle_bytes: usize,
    pub output_throttle_window_ms: u64,
    pub output_throttle_delay_ms: u64,

    pub keyboard_interactive_policy: PromptPolicy,

    /// Upper bound on keyboard-interactive info-request rounds
    pub max_keyboard_interactive_rounds: usize,

    /// Default log filter
    pub log_level: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            ready_timeout_secs: 30,
            keepalive_interval_secs: 30,
            keepalive_max: 3,
            default_auth_methods: vec![
                AuthMethodKind::KeyboardInteractive,
                AuthMethodKind::Password,
            ],
            shell_term: "xterm-256color".to_string(),
            exec_term: "vt100".to_string(),
            pager_disable_command: "terminal length 0".to_string(),
            output_throttle_bytes: 5000,
            output_throttle_window_ms: 100,
            output_throttle_delay_ms: 10,
            keyboard_interactive_policy: PromptPolicy::AnswerAll,
            max_keyboard_interactive_rounds: 5,
            log_level: "info".to_string(),
        }
    }
}

impl BridgeSettings {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.output_throttle_window_ms)
    }

    pub fn throttle_delay(&self) -> Duration {
        Duration::from_millis(self.output_throttle_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_fill_defaults() {
        let settings: BridgeSettings =
            serde_json::from_str(r#"{"readyTimeoutSecs": 5, "execTerm": "ansi"}"#).unwrap();

        assert_eq!(settings.ready_timeout(), Duration::from_secs(5));
        assert_eq!(settings.exec_term, "ansi");
        assert_eq!(settings.keepalive_interval_secs, 30);
        assert_eq!(
            settings.default_auth_methods,
            vec![AuthMethodKind::KeyboardInteractive, AuthMethodKind::Password]
        );
    }

    #[test]
    fn test_policy_names() {
        let settings: BridgeSettings =
            serde_json::from_str(r#"{"keyboardInteractivePolicy": "password-prompts-only"}"#)
                .unwrap();
        assert_eq!(
            settings.keyboard_interactive_policy,
            PromptPolicy::PasswordPromptsOnly
        );
    }
}
