//! SSH connection bridge
//!
//! One bridge per terminal: it turns display-surface messages into SSH
//! operations and SSH activity back into outbound envelopes.

pub mod diagnostics;
pub mod emitter;
pub mod error;
pub mod manager;
pub mod state;
pub mod task;

pub use diagnostics::DiagnosticSnapshot;
pub use emitter::{ChannelSurface, DisplaySurface, SurfaceError};
pub use error::BridgeError;
pub use manager::{BridgeEvent, SshBridge};
pub use state::{ConnectionStatus, Dimensions, TransportMode};
pub use task::{spawn_bridge, BridgeHandle};
