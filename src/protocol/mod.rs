//! Message protocol between a bridge and its display surface

pub mod envelope;
pub mod inbound;
pub mod outbound;

pub use envelope::{now_millis, Envelope};
pub use inbound::{decode, DecodeError, Decoded, InboundMessage, TerminalSize};
pub use outbound::{MetadataPayload, OutboundMessage};
