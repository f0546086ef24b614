//! Connection state machine
//!
//! `status` follows the transition table in [`next_status`]; `transport_mode`
//! follows [`next_mode`]. Both are pure functions so the tables can be
//! tested without a transport.

use serde::Serialize;

use crate::ssh::ConnectionConfig;

/// Connection status; exactly one holds at any time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data channel flavour, chosen once per connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Unset,
    Shell,
    Exec,
}

/// SSH lifecycle events driving `status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    ConnectRequested,
    Ready,
    Failed,
    Closed,
    DisconnectRequested,
}

/// Events driving `transport_mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeEvent {
    /// A fresh connect attempt
    Reset,
    ShellAttempt,
    /// Shell open failed with the shell-unsupported signature
    ShellUnsupported,
}

/// Status transition table. `None` means the event does not apply in the
/// current state and must be ignored.
pub fn next_status(current: ConnectionStatus, event: LifecycleEvent) -> Option<ConnectionStatus> {
    use ConnectionStatus::*;
    use LifecycleEvent::*;

    match (current, event) {
        (_, ConnectRequested) => Some(Connecting),
        (Connecting, Ready) => Some(Connected),
        (Connecting | Connected, Failed) => Some(Error),
        (Connecting | Connected | Error, Closed) => Some(Disconnected),
        (Connecting | Connected | Error, DisconnectRequested) => Some(Disconnected),
        _ => None,
    }
}

/// Transport mode transition table: `unset → shell → exec`, never back.
pub fn next_mode(current: TransportMode, event: ModeEvent) -> Option<TransportMode> {
    use ModeEvent::*;
    use TransportMode::*;

    match (current, event) {
        (_, Reset) => Some(Unset),
        (Unset, ShellAttempt) => Some(Shell),
        (Shell, ShellUnsupported) => Some(Exec),
        _ => None,
    }
}

/// Terminal dimensions, both always > 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub cols: u32,
    pub rows: u32,
}

impl Dimensions {
    /// Validate raw values from the display surface.
    pub fn new(cols: i64, rows: i64) -> Option<Self> {
        if cols <= 0 || rows <= 0 {
            return None;
        }
        Some(Self {
            cols: u32::try_from(cols).ok()?,
            rows: u32::try_from(rows).ok()?,
        })
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Per-connection state
#[derive(Debug)]
pub struct ConnectionState {
    status: ConnectionStatus,
    transport_mode: TransportMode,
    pub dimensions: Dimensions,
    /// Config of the most recent connect request (in memory only)
    pub last_config: Option<ConnectionConfig>,
    bytes_sent: u64,
    bytes_received: u64,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            transport_mode: TransportMode::Unset,
            dimensions: Dimensions::default(),
            last_config: None,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }
}

impl ConnectionState {
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn transport_mode(&self) -> TransportMode {
        self.transport_mode
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Apply a lifecycle event; returns the new status if it changed.
    pub fn apply(&mut self, event: LifecycleEvent) -> Option<ConnectionStatus> {
        let next = next_status(self.status, event)?;
        self.status = next;
        Some(next)
    }

    pub fn apply_mode(&mut self, event: ModeEvent) -> Option<TransportMode> {
        let next = next_mode(self.transport_mode, event)?;
        self.transport_mode = next;
        Some(next)
    }

    pub fn record_sent(&mut self, n: usize) {
        self.bytes_sent = self.bytes_sent.saturating_add(n as u64);
    }

    pub fn record_received(&mut self, n: usize) {
        self.bytes_received = self.bytes_received.saturating_add(n as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionStatus::*;
    use LifecycleEvent::*;

    #[test]
    fn test_happy_path() {
        let mut state = ConnectionState::default();
        assert_eq!(state.apply(ConnectRequested), Some(Connecting));
        assert_eq!(state.apply(Ready), Some(Connected));
        assert_eq!(state.apply(Closed), Some(Disconnected));
    }

    #[test]
    fn test_failure_path() {
        assert_eq!(next_status(Connecting, Failed), Some(Error));
        assert_eq!(next_status(Error, Closed), Some(Disconnected));
        assert_eq!(next_status(Error, ConnectRequested), Some(Connecting));
    }

    #[test]
    fn test_connected_and_error_exclusive() {
        // no transition between the two within an attempt
        assert_eq!(next_status(Error, Ready), None);
        assert_eq!(next_status(Connected, Ready), None);
        assert_eq!(next_status(Disconnected, Ready), None);
        assert_eq!(next_status(Disconnected, Failed), None);
    }

    #[test]
    fn test_disconnect_idempotent() {
        assert_eq!(next_status(Disconnected, DisconnectRequested), None);
        assert_eq!(next_status(Disconnected, Closed), None);
        assert_eq!(next_status(Connecting, DisconnectRequested), Some(Disconnected));
    }

    #[test]
    fn test_mode_never_returns_to_shell() {
        use ModeEvent::*;
        use TransportMode::*;

        assert_eq!(next_mode(Unset, ShellAttempt), Some(Shell));
        assert_eq!(next_mode(Shell, ShellUnsupported), Some(Exec));
        assert_eq!(next_mode(Exec, ShellAttempt), None);
        assert_eq!(next_mode(Unset, ShellUnsupported), None);
        assert_eq!(next_mode(Exec, Reset), Some(Unset));
    }

    #[test]
    fn test_dimensions_validation() {
        assert_eq!(Dimensions::new(100, 40), Some(Dimensions { cols: 100, rows: 40 }));
        assert_eq!(Dimensions::new(0, 24), None);
        assert_eq!(Dimensions::new(80, -1), None);
        assert_eq!(Dimensions::new(i64::MAX, 24), None);
    }

    #[test]
    fn test_counters_monotonic() {
        let mut state = ConnectionState::default();
        state.record_sent(3);
        state.record_sent(2);
        state.record_received(10);
        assert_eq!(state.bytes_sent(), 5);
        assert_eq!(state.bytes_received(), 10);
    }
}
