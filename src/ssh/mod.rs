//! SSH module - connections, authentication and data channels
//!
//! This module provides the SSH side of the bridge using the russh library.
//!
//! # Features
//! - Default / custom / legacy algorithm preference sets
//! - Ordered keyboard-interactive and password authentication
//! - PTY shell channels with an exec-channel fallback
//! - Single-owner handle task per connection

pub mod algorithms;
mod client;
mod config;
mod error;
mod handle_owner;
pub mod keyboard_interactive;
mod session;
mod transport;

pub use algorithms::{legacy_retry_config, AlgorithmProfile, AlgorithmSet};
pub use client::{ClientHandler, RusshConnector};
pub use config::{AlgorithmOverrides, AuthMethodKind, ConnectionConfig, SecretString};
pub use error::{mentions_authentication, SshError};
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController};
pub use keyboard_interactive::{KbiPrompt, PromptPolicy};
pub use session::{ChannelEnd, ChannelHandle, ChannelOutput, PtyRequest, SessionCommand};
pub use transport::{ConnectRequest, Connector, Transport};
