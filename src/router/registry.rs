//! Connection registry
//!
//! Maps connection ids to running bridges and sessions to their connections.
//! At most one bridge exists per connection id.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::bridge::BridgeHandle;
use crate::ssh::ConnectionConfig;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Connection already registered: {0}")]
    DuplicateConnection(String),

    #[error("Connection not found: {0}")]
    NotFound(String),
}

/// One registered terminal connection
pub struct RegistryEntry {
    pub handle: BridgeHandle,
    /// Config to connect with once the surface reports `init`
    pub pending_config: Option<ConnectionConfig>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, RegistryEntry>,
    /// session id → connection ids, in creation order
    sessions: DashMap<String, Vec<String>>,
    /// Serialises check-then-insert
    create_lock: Mutex<()>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bridge. Fails if its connection id is taken.
    pub fn insert(
        &self,
        handle: BridgeHandle,
        pending_config: Option<ConnectionConfig>,
    ) -> Result<(), RegistryError> {
        let _guard = self.create_lock.lock();
        let connection_id = handle.connection_id().to_string();
        if self.connections.contains_key(&connection_id) {
            return Err(RegistryError::DuplicateConnection(connection_id));
        }

        self.sessions
            .entry(handle.session_id().to_string())
            .or_default()
            .push(connection_id.clone());
        info!(
            "Registered connection {} for session {}",
            connection_id,
            handle.session_id()
        );
        self.connections.insert(
            connection_id,
            RegistryEntry {
                handle,
                pending_config,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn get(&self, connection_id: &str) -> Result<BridgeHandle, RegistryError> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| RegistryError::NotFound(connection_id.to_string()))
    }

    /// Take the config stored at open time, leaving none behind.
    pub fn take_pending_config(&self, connection_id: &str) -> Option<ConnectionConfig> {
        self.connections
            .get_mut(connection_id)
            .and_then(|mut entry| entry.pending_config.take())
    }

    /// Remove a connection and shut its bridge down. Idempotent.
    pub fn dispose(&self, connection_id: &str) -> bool {
        let Some((_, entry)) = self.connections.remove(connection_id) else {
            debug!("Connection {} already disposed", connection_id);
            return false;
        };

        let session_id = entry.handle.session_id().to_string();
        let now_empty = match self.sessions.get_mut(&session_id) {
            Some(mut ids) => {
                ids.retain(|id| id != connection_id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.sessions.remove_if(&session_id, |_, ids| ids.is_empty());
        }

        entry.handle.shutdown();
        info!(
            "Disposed connection {} (open since {})",
            connection_id,
            entry.created_at.to_rfc3339()
        );
        true
    }

    pub fn connection_ids(&self) -> Vec<String> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    pub fn connections_for_session(&self, session_id: &str) -> Vec<String> {
        self.sessions
            .get(session_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default()
    }

    pub fn has_terminal_open(&self, session_id: &str) -> bool {
        !self.connections_for_session(session_id).is_empty()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
