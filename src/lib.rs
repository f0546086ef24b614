//! TermTel Bridge - SSH connection bridge for embedded terminals
//!
//! Each terminal display surface gets one bridge. A bridge owns a single
//! SSH connection (via russh), drives it through a small state machine and
//! translates between the surface's JSON messages and SSH channel traffic.
//!
//! - [`bridge`]: per-connection state machine, outbound emitter, diagnostics
//! - [`ssh`]: algorithm negotiation, authentication, shell/exec channels
//! - [`protocol`]: inbound decoding and outbound envelopes
//! - [`router`]: connection registry and host message routing
//! - [`config`] / [`logging`]: settings file and telemetry log

pub mod bridge;
pub mod config;
pub mod logging;
pub mod protocol;
pub mod router;
pub mod ssh;

#[cfg(test)]
mod testing;

pub use bridge::{spawn_bridge, BridgeHandle, ConnectionStatus, DisplaySurface, SshBridge};
pub use config::BridgeSettings;
pub use protocol::{Envelope, InboundMessage, OutboundMessage};
pub use router::{ConnectionRegistry, HostMessageRouter};
pub use ssh::{ConnectionConfig, RusshConnector};
