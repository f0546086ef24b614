//! SSH connection configuration

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use zeroize::Zeroizing;

/// Password held in memory only; zeroed on drop and redacted in `Debug`.
#[derive(Clone)]
pub struct SecretString(Zeroizing<String>);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretString::new)
    }
}

/// Authentication methods the bridge can attempt, in caller-chosen order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethodKind {
    KeyboardInteractive,
    Password,
}

impl AuthMethodKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "keyboard-interactive" => Some(Self::KeyboardInteractive),
            "password" => Some(Self::Password),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeyboardInteractive => "keyboard-interactive",
            Self::Password => "password",
        }
    }
}

impl fmt::Display for AuthMethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-category algorithm preference overrides. A present list replaces the
/// default for that category only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kex: Option<Vec<String>>,

    #[serde(default, alias = "hostKey", skip_serializing_if = "Option::is_none")]
    pub server_host_key: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cipher: Option<Vec<String>>,

    #[serde(default, alias = "mac", skip_serializing_if = "Option::is_none")]
    pub hmac: Option<Vec<String>>,

    #[serde(default, alias = "compression", skip_serializing_if = "Option::is_none")]
    pub compress: Option<Vec<String>>,
}

impl AlgorithmOverrides {
    pub fn is_empty(&self) -> bool {
        self.kex.is_none()
            && self.server_host_key.is_none()
            && self.cipher.is_none()
            && self.hmac.is_none()
            && self.compress.is_none()
    }
}

/// SSH connection parameters supplied with a `connect` request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: Option<SecretString>,

    #[serde(default)]
    pub algorithms: Option<AlgorithmOverrides>,

    /// Ordered auth method names; unknown names are skipped
    #[serde(default)]
    pub auth_methods: Option<Vec<String>>,
}

fn default_port() -> u16 {
    22
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: None,
            algorithms: None,
            auth_methods: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::new(password));
        self
    }

    /// Host and username are the only fields without a usable default.
    pub fn has_required_fields(&self) -> bool {
        !self.host.trim().is_empty() && !self.username.trim().is_empty() && self.port != 0
    }

    pub fn has_password(&self) -> bool {
        self.password.as_ref().is_some_and(|p| !p.is_empty())
    }

    /// Resolve the auth order, falling back to `defaults` when the config
    /// names none (or only unknown methods).
    pub fn resolved_auth_methods(&self, defaults: &[AuthMethodKind]) -> Vec<AuthMethodKind> {
        let mut resolved = Vec::new();
        for name in self.auth_methods.iter().flatten() {
            match AuthMethodKind::from_name(name) {
                Some(kind) if !resolved.contains(&kind) => resolved.push(kind),
                Some(_) => {}
                None => tracing::debug!("Ignoring unsupported auth method '{}'", name),
            }
        }
        if resolved.is_empty() {
            defaults.to_vec()
        } else {
            resolved
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_camel_case() {
        let config: ConnectionConfig = serde_json::from_value(serde_json::json!({
            "host": "10.0.0.1",
            "username": "admin",
            "password": "x",
            "algorithms": { "serverHostKey": ["ssh-rsa"], "compress": ["none"] },
            "authMethods": ["password"]
        }))
        .unwrap();

        assert_eq!(config.port, 22);
        assert!(config.has_required_fields());
        assert_eq!(config.password.as_ref().map(|p| p.expose()), Some("x"));
        let algorithms = config.algorithms.unwrap();
        assert_eq!(algorithms.server_host_key, Some(vec!["ssh-rsa".to_string()]));
        assert!(algorithms.kex.is_none());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ConnectionConfig::new("h", 22, "u").with_password("hunter2");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_missing_fields() {
        let config: ConnectionConfig =
            serde_json::from_value(serde_json::json!({ "host": "h" })).unwrap();
        assert!(!config.has_required_fields());
    }

    #[test]
    fn test_resolved_auth_methods() {
        let defaults = [AuthMethodKind::KeyboardInteractive, AuthMethodKind::Password];

        let mut config = ConnectionConfig::new("h", 22, "u");
        assert_eq!(config.resolved_auth_methods(&defaults), defaults.to_vec());

        config.auth_methods = Some(vec![
            "password".into(),
            "publickey".into(),
            "password".into(),
            "keyboard-interactive".into(),
        ]);
        assert_eq!(
            config.resolved_auth_methods(&defaults),
            vec![AuthMethodKind::Password, AuthMethodKind::KeyboardInteractive]
        );

        config.auth_methods = Some(vec!["agent".into()]);
        assert_eq!(config.resolved_auth_methods(&defaults), defaults.to_vec());
    }
}
