//! Diagnostic snapshots
//!
//! Snapshots never carry secrets: the password is reduced to a
//! `passwordProvided` flag and any literal occurrence of it in recorded
//! strings is masked.

use std::collections::VecDeque;
use std::fmt::Write as _;

use serde::Serialize;

use super::state::{ConnectionStatus, Dimensions, TransportMode};
use crate::ssh::{AlgorithmProfile, AlgorithmSet, AuthMethodKind, ConnectionConfig};

const HISTORY_LEN: usize = 10;
const HISTORY_ENTRY_CHARS: usize = 50;
const MASK: &str = "***";

/// Last few output chunks, ANSI-stripped and truncated
#[derive(Debug, Default)]
pub struct OutputHistory {
    entries: VecDeque<String>,
}

impl OutputHistory {
    pub fn push(&mut self, text: &str) {
        let plain = strip_ansi_escapes::strip_str(text);
        let entry = if plain.chars().count() > HISTORY_ENTRY_CHARS {
            let head: String = plain.chars().take(HISTORY_ENTRY_CHARS).collect();
            format!("{}...", head)
        } else {
            plain
        };
        if self.entries.len() == HISTORY_LEN {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &String> {
        self.entries.iter()
    }
}

/// Redacted summary of the last connection config
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSummary {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_methods: Vec<String>,
    pub algorithm_profile: AlgorithmProfile,
    pub password_provided: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSnapshot {
    pub connection_id: String,
    pub session_id: String,
    pub status: ConnectionStatus,
    pub transport_mode: TransportMode,
    pub dimensions: Dimensions,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last_outputs: Vec<String>,
    pub last_config: Option<ConfigSummary>,
}

/// Inputs for a snapshot, borrowed from the bridge
pub struct SnapshotSource<'a> {
    pub connection_id: &'a str,
    pub session_id: &'a str,
    pub status: ConnectionStatus,
    pub transport_mode: TransportMode,
    pub dimensions: Dimensions,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub history: &'a OutputHistory,
    pub last_config: Option<&'a ConnectionConfig>,
    pub default_auth_methods: &'a [AuthMethodKind],
}

fn mask(text: &str, secret: Option<&str>) -> String {
    match secret {
        Some(s) if !s.is_empty() => text.replace(s, MASK),
        _ => text.to_string(),
    }
}

impl DiagnosticSnapshot {
    pub fn capture(source: SnapshotSource<'_>) -> Self {
        let secret = source
            .last_config
            .and_then(|c| c.password.as_ref())
            .map(|p| p.expose());

        let last_config = source.last_config.map(|config| ConfigSummary {
            host: mask(&config.host, secret),
            port: config.port,
            username: mask(&config.username, secret),
            auth_methods: config
                .resolved_auth_methods(source.default_auth_methods)
                .iter()
                .map(|m| m.as_str().to_string())
                .collect(),
            algorithm_profile: AlgorithmSet::resolve(config.algorithms.as_ref()).profile,
            password_provided: config.has_password(),
        });

        Self {
            connection_id: source.connection_id.to_string(),
            session_id: source.session_id.to_string(),
            status: source.status,
            transport_mode: source.transport_mode,
            dimensions: source.dimensions,
            bytes_sent: source.bytes_sent,
            bytes_received: source.bytes_received,
            last_outputs: source.history.entries().map(|e| mask(e, secret)).collect(),
            last_config,
        }
    }

    /// Human-readable block for the terminal.
    pub fn render(&self) -> String {
        let auth = self
            .last_config
            .as_ref()
            .map(|c| c.auth_methods.join(", "))
            .unwrap_or_else(|| "none".to_string());

        let mut out = String::from("\r\n----- SSH DIAGNOSTICS -----\r\n");
        let _ = write!(out, "Connection ID: {}\r\n", self.connection_id);
        let _ = write!(out, "Session ID: {}\r\n", self.session_id);
        let _ = write!(out, "Status: {}\r\n", self.status);
        let _ = write!(out, "Transport: {:?}\r\n", self.transport_mode);
        let _ = write!(
            out,
            "Dimensions: {}x{}\r\n",
            self.dimensions.cols, self.dimensions.rows
        );
        let _ = write!(out, "Bytes sent: {}\r\n", self.bytes_sent);
        let _ = write!(out, "Bytes received: {}\r\n", self.bytes_received);
        if let Some(config) = &self.last_config {
            let _ = write!(
                out,
                "Target: {}@{}:{}\r\n",
                config.username, config.host, config.port
            );
        }
        let _ = write!(out, "Authentication methods: {}\r\n", auth);
        out.push_str("------------------------\r\n");
        out
    }
}
