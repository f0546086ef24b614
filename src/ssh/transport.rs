//! Transport seam between the bridge and an SSH implementation
//!
//! The bridge only ever sees these traits; `RusshConnector` implements them
//! over russh, tests implement them with in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::algorithms::AlgorithmSet;
use super::config::{AuthMethodKind, ConnectionConfig};
use super::error::SshError;
use super::keyboard_interactive::PromptPolicy;
use super::session::{ChannelHandle, PtyRequest};

/// Everything needed to bring one SSH connection to the ready state
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Label for log lines (the connection id)
    pub label: String,
    pub config: ConnectionConfig,
    pub algorithms: AlgorithmSet,
    pub auth_methods: Vec<AuthMethodKind>,
    pub prompt_policy: PromptPolicy,
    pub max_kbi_rounds: usize,
    pub ready_timeout: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_max: usize,
    /// Receives server banner text while connecting
    pub banner_tx: Option<mpsc::UnboundedSender<String>>,
}

/// Opens authenticated SSH connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, request: ConnectRequest) -> Result<Arc<dyn Transport>, SshError>;
}

/// An authenticated SSH connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a PTY-backed interactive shell channel.
    async fn open_shell(&self, pty: &PtyRequest) -> Result<ChannelHandle, SshError>;

    /// Open a PTY-backed exec channel running `command`.
    async fn open_exec(&self, pty: &PtyRequest, command: &str) -> Result<ChannelHandle, SshError>;

    /// End the connection. Idempotent.
    async fn end(&self);

    /// Resolve once the connection is gone, for whatever reason.
    async fn closed(&self);
}
