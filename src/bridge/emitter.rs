//! Outbound emitter
//!
//! Wraps every outbound message in an [`Envelope`] and posts it to the
//! bridge's display surface. Surface failures are logged, never propagated.
//!
//! Large `output` chunks arriving in quick succession are deferred by a short
//! fixed delay. The delay is awaited inline, so it can hold back later
//! messages but never reorder them.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::config::BridgeSettings;
use crate::protocol::{Envelope, OutboundMessage};

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("display surface closed")]
    Closed,

    #[error("display surface rejected message: {0}")]
    Rejected(String),
}

/// Remote display surface a bridge posts envelopes to
pub trait DisplaySurface: Send + Sync {
    fn post_message(&self, envelope: &Envelope) -> Result<(), SurfaceError>;
}

/// Surface backed by an mpsc channel (stdio host, router fan-in)
#[derive(Clone)]
pub struct ChannelSurface {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ChannelSurface {
    pub fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { tx }
    }
}

impl DisplaySurface for ChannelSurface {
    fn post_message(&self, envelope: &Envelope) -> Result<(), SurfaceError> {
        self.tx
            .send(envelope.clone())
            .map_err(|_| SurfaceError::Closed)
    }
}

/// Output throttle parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    /// Chunks strictly larger than this are candidates for deferral
    pub max_bytes: usize,
    pub window: Duration,
    pub delay: Duration,
}

impl From<&BridgeSettings> for Throttle {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            max_bytes: settings.output_throttle_bytes,
            window: settings.throttle_window(),
            delay: settings.throttle_delay(),
        }
    }
}

pub struct OutboundEmitter {
    connection_id: String,
    session_id: String,
    surface: Arc<dyn DisplaySurface>,
    throttle: Throttle,
    last_sent: Option<Instant>,
}

impl OutboundEmitter {
    pub fn new(
        connection_id: &str,
        session_id: &str,
        surface: Arc<dyn DisplaySurface>,
        throttle: Throttle,
    ) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            session_id: session_id.to_string(),
            surface,
            throttle,
            last_sent: None,
        }
    }

    /// Whether `message` must wait `throttle.delay` before being posted.
    fn should_defer(&self, message: &OutboundMessage, now: Instant) -> bool {
        match (message, self.last_sent) {
            (OutboundMessage::Output { data }, Some(last)) => {
                data.len() > self.throttle.max_bytes
                    && now.saturating_duration_since(last) < self.throttle.window
            }
            _ => false,
        }
    }

    pub async fn emit(&mut self, message: OutboundMessage) {
        match &message {
            OutboundMessage::Output { data } if data.len() <= 50 => debug!(
                "[{}] Sending message: output ({} bytes): {}",
                self.connection_id,
                data.len(),
                data.replace("\r\n", "\\n").replace('\n', "\\n")
            ),
            OutboundMessage::Output { data } => debug!(
                "[{}] Sending message: output ({} bytes)",
                self.connection_id,
                data.len()
            ),
            other => debug!("[{}] Sending message: {}", self.connection_id, other.kind()),
        }

        if self.should_defer(&message, Instant::now()) {
            tokio::time::sleep(self.throttle.delay).await;
        }

        let envelope = Envelope::new(&self.connection_id, &self.session_id, message);
        if let Err(e) = self.surface.post_message(&envelope) {
            error!(
                "[{}] Error sending {} message: {}",
                self.connection_id,
                envelope.message.kind(),
                e
            );
        }
        self.last_sent = Some(Instant::now());
    }
}
