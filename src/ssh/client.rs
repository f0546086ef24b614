//! SSH Client implementation using russh

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, KeyboardInteractiveAuthResponse};
use russh::keys::{HashAlg, PublicKey};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::config::AuthMethodKind;
use super::error::SshError;
use super::handle_owner::spawn_handle_owner_task;
use super::keyboard_interactive::KbiPrompt;
use super::transport::{ConnectRequest, Connector, Transport};

/// Client handler for russh callbacks
///
/// Host keys are accepted and their fingerprint logged; banners are relayed
/// to the bridge while connecting.
pub struct ClientHandler {
    label: String,
    host: String,
    port: u16,
    banner_tx: Option<mpsc::UnboundedSender<String>>,
}

impl ClientHandler {
    pub fn new(label: String, host: String, port: u16) -> Self {
        Self {
            label,
            host,
            port,
            banner_tx: None,
        }
    }

    pub fn with_banner_sink(mut self, banner_tx: Option<mpsc::UnboundedSender<String>>) -> Self {
        self.banner_tx = banner_tx;
        self
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        info!(
            "[{}] Host key for {}:{} ({}): {}",
            self.label,
            self.host,
            self.port,
            server_public_key.algorithm(),
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }

    async fn auth_banner(
        &mut self,
        banner: &str,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        debug!("[{}] Received auth banner ({} bytes)", self.label, banner.len());
        if let Some(tx) = &self.banner_tx {
            let _ = tx.send(banner.to_string());
        }
        Ok(())
    }
}

/// Connector backed by russh over TCP
#[derive(Debug, Default, Clone)]
pub struct RusshConnector;

impl RusshConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<Arc<dyn Transport>, SshError> {
        let deadline = request.ready_timeout;
        let label = request.label.clone();

        // Readiness covers TCP connect, handshake and authentication
        let handle = tokio::time::timeout(deadline, establish(request))
            .await
            .map_err(|_| {
                SshError::Timeout(format!(
                    "Timed out while waiting for handshake ({}s)",
                    deadline.as_secs()
                ))
            })??;

        Ok(Arc::new(spawn_handle_owner_task(handle, label)))
    }
}

async fn establish(request: ConnectRequest) -> Result<client::Handle<ClientHandler>, SshError> {
    let ConnectRequest {
        label,
        config,
        algorithms,
        auth_methods,
        prompt_policy,
        max_kbi_rounds,
        keepalive_interval,
        keepalive_max,
        banner_tx,
        ..
    } = request;

    let addr = format!("{}:{}", config.host, config.port);
    info!("[{}] Connecting to SSH server at {}", label, addr);

    let socket_addr = tokio::net::lookup_host(&addr)
        .await
        .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve address: {}", e)))?
        .next()
        .ok_or_else(|| SshError::ConnectionFailed(format!("No address found for {}", addr)))?;

    let stream = tokio::net::TcpStream::connect(socket_addr)
        .await
        .map_err(|e| SshError::ConnectionFailed(e.to_string()))?;

    let (preferred, offered) = algorithms.to_preferred();
    debug!("[{}] Offering algorithms: {:?}", label, offered);

    let ssh_config = Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(keepalive_interval),
        keepalive_max,
        preferred,
        ..Default::default()
    });

    let handler = ClientHandler::new(label.clone(), config.host.clone(), config.port)
        .with_banner_sink(banner_tx);

    let mut handle = client::connect_stream(ssh_config, stream, handler)
        .await
        .map_err(|e| match e {
            SshError::ProtocolError(msg) => SshError::ConnectionFailed(msg),
            other => other,
        })?;

    debug!("[{}] SSH handshake completed", label);

    for method in &auth_methods {
        let accepted = match method {
            AuthMethodKind::KeyboardInteractive => {
                let answers = |prompts: &[KbiPrompt]| {
                    prompt_policy.respond(prompts, config.password.as_ref())
                };
                keyboard_interactive(&mut handle, &label, &config.username, answers, max_kbi_rounds)
                    .await?
            }
            AuthMethodKind::Password => match &config.password {
                Some(password) => handle
                    .authenticate_password(&config.username, password.expose())
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
                    .success(),
                None => {
                    debug!("[{}] No password configured, skipping password auth", label);
                    false
                }
            },
        };

        if accepted {
            info!("[{}] SSH authentication successful via {}", label, method);
            return Ok(handle);
        }
        debug!("[{}] Auth method {} rejected", label, method);
    }

    Err(SshError::AuthenticationFailed(format!(
        "All configured authentication methods failed ({})",
        auth_methods
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

/// Run keyboard-interactive rounds, answering prompts via `respond`.
async fn keyboard_interactive<F>(
    handle: &mut client::Handle<ClientHandler>,
    label: &str,
    username: &str,
    respond: F,
    max_rounds: usize,
) -> Result<bool, SshError>
where
    F: Fn(&[KbiPrompt]) -> Vec<String>,
{
    let mut response = handle
        .authenticate_keyboard_interactive_start(username, None::<String>)
        .await
        .map_err(|e| SshError::AuthenticationFailed(format!("KBI start failed: {}", e)))?;

    for round in 0..=max_rounds {
        match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(true),
            KeyboardInteractiveAuthResponse::Failure { .. } => return Ok(false),
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                if round == max_rounds {
                    warn!("[{}] Giving up keyboard-interactive after {} rounds", label, max_rounds);
                    return Ok(false);
                }
                debug!("[{}] KBI InfoRequest with {} prompts", label, prompts.len());
                let prompts: Vec<KbiPrompt> = prompts
                    .into_iter()
                    .map(|p| KbiPrompt {
                        prompt: p.prompt,
                        echo: p.echo,
                    })
                    .collect();
                response = handle
                    .authenticate_keyboard_interactive_respond(respond(&prompts))
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(format!("KBI respond failed: {}", e)))?;
            }
        }
    }
    Ok(false)
}
