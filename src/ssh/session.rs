//! SSH channel I/O
//!
//! A data channel (interactive shell or exec-with-PTY) is driven by one task
//! that owns the russh `Channel`. The bridge talks to it through a
//! [`ChannelHandle`]: commands in, output out.

use bytes::Bytes;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::error::SshError;

const CHANNEL_BUFFER: usize = 1024;

/// PTY parameters for a new channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

/// Commands that can be sent to a data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Data to send to remote stdin
    Data(Bytes),
    /// Resize the PTY (cols, rows)
    Resize(u32, u32),
    /// Close the channel
    Close,
}

/// Output produced by a data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutput {
    Data(Bytes),
    /// Extended data (stderr)
    ExtendedData(Bytes),
    ExitStatus(u32),
    /// Channel finished; nothing follows
    Closed,
}

/// Bridge-side end of a data channel
#[derive(Debug)]
pub struct ChannelHandle {
    pub cmd_tx: mpsc::Sender<SessionCommand>,
    pub output_rx: mpsc::Receiver<ChannelOutput>,
}

/// Transport-side end of a data channel
#[derive(Debug)]
pub struct ChannelEnd {
    pub cmd_rx: mpsc::Receiver<SessionCommand>,
    pub output_tx: mpsc::Sender<ChannelOutput>,
}

impl ChannelHandle {
    /// Create a connected handle/end pair.
    pub fn pair() -> (ChannelHandle, ChannelEnd) {
        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_BUFFER);
        let (output_tx, output_rx) = mpsc::channel(CHANNEL_BUFFER);
        (
            ChannelHandle { cmd_tx, output_rx },
            ChannelEnd { cmd_rx, output_tx },
        )
    }
}

/// Request kinds that wait for a server reply
#[derive(Debug, Clone, Copy)]
enum Request {
    Pty,
    Shell,
    Exec,
}

/// Wait for the server's reply to a want_reply request.
///
/// Data arriving before the reply is kept in `early` so it can be replayed.
async fn wait_for_reply(
    channel: &mut Channel<Msg>,
    request: Request,
    early: &mut Vec<ChannelOutput>,
) -> Result<(), SshError> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Ok(()),
            Some(ChannelMsg::Failure) => {
                return Err(match request {
                    Request::Shell => {
                        SshError::ShellUnsupported("shell request refused".to_string())
                    }
                    Request::Pty => SshError::ChannelError("PTY request refused".to_string()),
                    Request::Exec => SshError::ChannelError("exec request refused".to_string()),
                })
            }
            Some(ChannelMsg::Data { data }) => early.push(ChannelOutput::Data(Bytes::copy_from_slice(&data))),
            Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                early.push(ChannelOutput::ExtendedData(Bytes::copy_from_slice(&data)))
            }
            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                return Err(SshError::ChannelError(format!(
                    "channel closed while waiting for {:?} reply",
                    request
                )))
            }
            Some(other) => debug!("Ignoring {:?} while waiting for {:?} reply", other, request),
        }
    }
}

async fn request_pty(
    channel: &mut Channel<Msg>,
    pty: &PtyRequest,
    early: &mut Vec<ChannelOutput>,
) -> Result<(), SshError> {
    channel
        .request_pty(true, &pty.term, pty.cols, pty.rows, 0, 0, &[])
        .await
        .map_err(|e| SshError::ChannelError(format!("PTY request failed: {}", e)))?;
    wait_for_reply(channel, Request::Pty, early).await
}

/// Allocate a PTY and start an interactive shell on `channel`.
pub async fn start_shell(
    mut channel: Channel<Msg>,
    pty: &PtyRequest,
    label: String,
) -> Result<ChannelHandle, SshError> {
    let mut early = Vec::new();
    request_pty(&mut channel, pty, &mut early).await?;

    debug!("PTY allocated, requesting shell for {}", label);
    channel
        .request_shell(true)
        .await
        .map_err(|e| SshError::ChannelError(format!("Shell request failed: {}", e)))?;
    wait_for_reply(&mut channel, Request::Shell, &mut early).await?;

    info!("Interactive shell started for {} ({}x{})", label, pty.cols, pty.rows);
    Ok(spawn_channel_task(channel, early, label))
}

/// Allocate a PTY and run `command` on `channel`, keeping the channel open
/// for interactive I/O afterwards.
pub async fn start_exec(
    mut channel: Channel<Msg>,
    pty: &PtyRequest,
    command: &str,
    label: String,
) -> Result<ChannelHandle, SshError> {
    let mut early = Vec::new();
    request_pty(&mut channel, pty, &mut early).await?;

    debug!("PTY allocated, executing '{}' for {}", command, label);
    channel
        .exec(true, command)
        .await
        .map_err(|e| SshError::ChannelError(format!("Exec request failed: {}", e)))?;
    wait_for_reply(&mut channel, Request::Exec, &mut early).await?;

    info!("Exec terminal started for {} ({}x{})", label, pty.cols, pty.rows);
    Ok(spawn_channel_task(channel, early, label))
}

fn spawn_channel_task(channel: Channel<Msg>, early: Vec<ChannelOutput>, label: String) -> ChannelHandle {
    let (handle, end) = ChannelHandle::pair();
    tokio::spawn(run_channel(channel, end, early, label));
    handle
}

async fn run_channel(
    mut channel: Channel<Msg>,
    end: ChannelEnd,
    early: Vec<ChannelOutput>,
    label: String,
) {
    let ChannelEnd {
        mut cmd_rx,
        output_tx,
    } = end;

    debug!("Channel handler started for {}", label);

    for chunk in early {
        let _ = output_tx.send(chunk).await;
    }

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Data(data)) => {
                        if let Err(e) = channel.data(&data[..]).await {
                            error!("Failed to send data to SSH channel for {}: {}", label, e);
                            break;
                        }
                    }
                    Some(SessionCommand::Resize(cols, rows)) => {
                        debug!("Sending window_change: {}x{} for {}", cols, rows, label);
                        if let Err(e) = channel.window_change(cols, rows, 0, 0).await {
                            error!("Failed to resize PTY for {}: {}", label, e);
                        }
                    }
                    Some(SessionCommand::Close) | None => {
                        info!("Closing channel for {}", label);
                        let _ = channel.eof().await;
                        let _ = channel.close().await;
                        break;
                    }
                }
            }

            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { data }) => {
                        let _ = output_tx.send(ChannelOutput::Data(Bytes::copy_from_slice(&data))).await;
                    }
                    Some(ChannelMsg::ExtendedData { data, ext }) => {
                        if ext == 1 {
                            let _ = output_tx
                                .send(ChannelOutput::ExtendedData(Bytes::copy_from_slice(&data)))
                                .await;
                        }
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        info!("SSH channel exit status {} for {}", exit_status, label);
                        let _ = output_tx.send(ChannelOutput::ExitStatus(exit_status)).await;
                    }
                    Some(ChannelMsg::Eof) => {
                        debug!("SSH channel EOF for {}", label);
                    }
                    Some(ChannelMsg::Close) | None => {
                        info!("SSH channel closed for {}", label);
                        break;
                    }
                    Some(_) => {}
                }
            }
        }
    }

    let _ = output_tx.send(ChannelOutput::Closed).await;
    info!("Channel handler terminated for {}", label);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_is_connected() {
        let (mut handle, mut end) = ChannelHandle::pair();

        handle.cmd_tx.send(SessionCommand::Resize(80, 24)).await.unwrap();
        assert_eq!(end.cmd_rx.recv().await, Some(SessionCommand::Resize(80, 24)));

        end.output_tx
            .send(ChannelOutput::Data(Bytes::from_static(b"hi")))
            .await
            .unwrap();
        assert_eq!(
            handle.output_rx.recv().await,
            Some(ChannelOutput::Data(Bytes::from_static(b"hi")))
        );
    }
}
