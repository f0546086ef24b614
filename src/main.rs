//! TermTel bridge host
//!
//! Drives bridges over stdin/stdout so any process can act as the host.
//!
//! ## Protocol
//!
//! Line-delimited JSON.
//! - In: `{"event": "open", "sessionId": "...", "config": {...}}`,
//!   `{"event": "message", "connectionId": "...", "message": {...}}`,
//!   `{"event": "close", "connectionId": "..."}`
//! - Out: bridge envelopes (`{"connectionId", "sessionId", "type", "payload", "timestamp"}`)
//!   and router replies (`{"event": "opened", "connectionId": "...", ...}`)
//!
//! Logs go to stderr and the telemetry log file; stdout carries protocol only.
//! The process shuts down when stdin closes.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use termtel_bridge::bridge::{ChannelSurface, DisplaySurface};
use termtel_bridge::config::{BridgeSettings, SettingsStorage, StorageError};
use termtel_bridge::logging::{init_logging, LogConfig};
use termtel_bridge::protocol::Envelope;
use termtel_bridge::router::{HostEvent, HostMessageRouter, HostReply};
use termtel_bridge::ssh::RusshConnector;

const VERSION: &str = env!("CARGO_PKG_VERSION");

async fn load_settings() -> Result<BridgeSettings, StorageError> {
    SettingsStorage::new()?.load().await
}

async fn write_stdout(
    mut envelopes: mpsc::UnboundedReceiver<Envelope>,
    mut replies: mpsc::UnboundedReceiver<HostReply>,
) {
    let mut stdout = tokio::io::stdout();
    loop {
        let line = tokio::select! {
            biased;
            Some(reply) = replies.recv() => serde_json::to_string(&reply),
            Some(envelope) = envelopes.recv() => envelope.to_json(),
            else => break,
        };

        match line {
            Ok(mut line) => {
                line.push('\n');
                if stdout.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                let _ = stdout.flush().await;
            }
            Err(e) => error!("Failed to serialize outbound line: {}", e),
        }
    }
}

#[tokio::main]
async fn main() {
    if std::env::args()
        .nth(1)
        .is_some_and(|arg| arg == "--version" || arg == "-V")
    {
        println!("termtel-bridge {}", VERSION);
        return;
    }

    let settings = load_settings().await;
    let level = settings
        .as_ref()
        .map(|s| s.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    let log_file = init_logging(&LogConfig {
        level,
        ..LogConfig::default()
    });

    info!(
        "termtel-bridge v{} starting (pid: {})",
        VERSION,
        std::process::id()
    );
    if let Some(path) = log_file {
        info!("Telemetry log: {}", path.display());
    }
    let settings = settings.unwrap_or_else(|e| {
        warn!("Using default settings: {}", e);
        BridgeSettings::default()
    });

    let (envelope_tx, envelope_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_stdout(envelope_rx, reply_rx));

    let surface: Arc<dyn DisplaySurface> = Arc::new(ChannelSurface::new(envelope_tx));
    let router = HostMessageRouter::new(Arc::new(RusshConnector::new()), Arc::new(settings));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<HostEvent>(&line) {
                    Ok(event) => {
                        if let Some(reply) = router.handle_host_event(event, surface.clone()) {
                            let _ = reply_tx.send(reply);
                        }
                    }
                    Err(e) => {
                        warn!("Invalid host event: {}", e);
                        let _ = reply_tx.send(HostReply::Error {
                            connection_id: None,
                            message: format!("Invalid host event: {}", e),
                        });
                    }
                }
            }
            Ok(None) => {
                info!("stdin closed, shutting down");
                break;
            }
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        }
    }

    let count = router.disconnect_all();
    info!("Disconnected {} terminal(s)", count);

    // the writer ends once every bridge has dropped its surface
    drop(surface);
    drop(reply_tx);
    drop(router);
    if tokio::time::timeout(Duration::from_secs(5), writer).await.is_err() {
        warn!("Timed out flushing stdout");
    }
    info!("Shutdown complete");
}
