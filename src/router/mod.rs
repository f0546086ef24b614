//! Host-side routing
//!
//! Owns every bridge in the process and routes host messages to them by
//! connection id.

pub mod host;
pub mod registry;

pub use host::{HostEvent, HostMessageRouter, HostReply};
pub use registry::{ConnectionRegistry, RegistryEntry, RegistryError};
