//! Handle Owner Task
//!
//! Only one task owns the russh `Handle<ClientHandler>`. Everything else
//! reaches it through a cloneable [`HandleController`], which sends commands
//! over an mpsc channel and observes connection loss through a watch flag.

use std::time::Duration;

use async_trait::async_trait;
use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;
use super::session::{self, ChannelHandle, PtyRequest};
use super::transport::Transport;

/// How often the owner checks whether russh has torn the session down
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Commands sent to the Handle Owner Task
pub enum HandleCommand {
    /// Open a session channel (for PTY shell/exec)
    ChannelOpenSession {
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Disconnect the SSH connection
    Disconnect,
}

/// Controller for sending commands to the Handle Owner Task
#[derive(Clone)]
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
    closed_rx: watch::Receiver<bool>,
    label: String,
}

impl HandleController {
    /// Open a session channel
    pub async fn open_session_channel(&self) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| SshError::ChannelError(e.to_string()))
    }

    /// Disconnect the SSH connection
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(HandleCommand::Disconnect).await;
    }

    /// Check if the connection is still up
    pub fn is_connected(&self) -> bool {
        !*self.closed_rx.borrow() && !self.cmd_tx.is_closed()
    }
}

#[async_trait]
impl Transport for HandleController {
    async fn open_shell(&self, pty: &PtyRequest) -> Result<ChannelHandle, SshError> {
        let channel = self.open_session_channel().await?;
        debug!("Session channel opened for {}, starting shell", self.label);
        session::start_shell(channel, pty, self.label.clone()).await
    }

    async fn open_exec(&self, pty: &PtyRequest, command: &str) -> Result<ChannelHandle, SshError> {
        let channel = self.open_session_channel().await?;
        debug!("Session channel opened for {}, starting exec", self.label);
        session::start_exec(channel, pty, command, self.label.clone()).await
    }

    async fn end(&self) {
        self.disconnect().await;
    }

    async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        // Err means the owner task is gone, which is also closed
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// Spawn the Handle Owner Task
///
/// Consumes ownership of the Handle and returns a controller for it.
pub fn spawn_handle_owner_task(handle: Handle<ClientHandler>, label: String) -> HandleController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(64);
    let (closed_tx, closed_rx) = watch::channel(false);
    let task_label = label.clone();

    tokio::spawn(async move {
        let handle = handle;
        let label = task_label;
        let mut poll = tokio::time::interval(CLOSE_POLL_INTERVAL);

        info!("Handle owner task started for {}", label);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(HandleCommand::ChannelOpenSession { reply_tx }) => {
                        let result = handle.channel_open_session().await;
                        if reply_tx.send(result).is_err() {
                            warn!("Caller dropped before receiving channel_open_session result");
                        }
                    }
                    Some(HandleCommand::Disconnect) => {
                        info!("Disconnect requested for {}", label);
                        break;
                    }
                    None => {
                        info!("All controllers dropped for {}", label);
                        break;
                    }
                },

                _ = poll.tick() => {
                    if handle.is_closed() {
                        info!("SSH session closed by peer or keepalive for {}", label);
                        break;
                    }
                }
            }
        }

        let _ = closed_tx.send(true);
        drain_pending_commands(&mut cmd_rx);

        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await;
        info!("Handle owner task terminated for {}", label);
    });

    HandleController {
        cmd_tx,
        closed_rx,
        label,
    }
}

/// Drain all pending commands, returning Disconnected to each caller
fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<HandleCommand>) {
    cmd_rx.close();

    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenSession { reply_tx } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Disconnect => {}
        }
    }
}
