//! Transport algorithm negotiation
//!
//! Three preference sets feed the russh handshake:
//! - default: broadly compatible ordering for modern and embedded SSH stacks,
//!   without the newer AEAD/stream ciphers older firmware rejects
//! - custom: caller overrides, each category replaced independently
//! - legacy: oldest algorithms first, only used by an explicit legacy retry
//!
//! Names russh cannot speak (`hmac-md5`, `hmac-sha1-96`, ...) are dropped
//! from the offered list with a debug log.

use std::borrow::Cow;

use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{cipher, compression, kex, mac, Preferred};
use serde::Serialize;
use tracing::{debug, warn};

use super::config::{AlgorithmOverrides, AuthMethodKind, ConnectionConfig};

const DEFAULT_KEX: &[&str] = &[
    "diffie-hellman-group14-sha256",
    "diffie-hellman-group-exchange-sha256",
    "ecdh-sha2-nistp256",
    "diffie-hellman-group14-sha1",
    "diffie-hellman-group-exchange-sha1",
    "diffie-hellman-group1-sha1",
];
const DEFAULT_HOST_KEY: &[&str] = &[
    "rsa-sha2-256",
    "rsa-sha2-512",
    "ssh-rsa",
    "ecdsa-sha2-nistp256",
    "ssh-dss",
];
const DEFAULT_CIPHER: &[&str] = &[
    "aes128-ctr",
    "aes192-ctr",
    "aes256-ctr",
    "aes128-cbc",
    "aes192-cbc",
    "aes256-cbc",
    "3des-cbc",
];
const DEFAULT_MAC: &[&str] = &["hmac-sha2-256", "hmac-sha2-512", "hmac-sha1", "hmac-md5"];
const DEFAULT_COMPRESSION: &[&str] = &["none", "zlib@openssh.com", "zlib"];

const LEGACY_KEX: &[&str] = &[
    "diffie-hellman-group1-sha1",
    "diffie-hellman-group14-sha1",
    "diffie-hellman-group-exchange-sha1",
    "diffie-hellman-group-exchange-sha256",
    "diffie-hellman-group14-sha256",
    "ecdh-sha2-nistp256",
];
const LEGACY_HOST_KEY: &[&str] = &["ssh-rsa", "ssh-dss", "ecdsa-sha2-nistp256", "rsa-sha2-256"];
const LEGACY_CIPHER: &[&str] = &[
    "3des-cbc",
    "aes128-cbc",
    "aes192-cbc",
    "aes256-cbc",
    "aes128-ctr",
    "aes192-ctr",
    "aes256-ctr",
];
const LEGACY_MAC: &[&str] = &[
    "hmac-sha1",
    "hmac-md5",
    "hmac-sha1-96",
    "hmac-md5-96",
    "hmac-sha2-256",
    "hmac-sha2-512",
];
const LEGACY_COMPRESSION: &[&str] = &["none", "zlib@openssh.com", "zlib"];

/// Where an algorithm set came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmProfile {
    Default,
    Legacy,
    Custom,
}

/// Ordered algorithm preferences per category, by wire name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmSet {
    pub profile: AlgorithmProfile,
    pub kex: Vec<String>,
    pub host_key: Vec<String>,
    pub cipher: Vec<String>,
    pub mac: Vec<String>,
    pub compression: Vec<String>,
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// A non-empty override replaces the category; empty or missing keeps `base`.
fn pick(over: &Option<Vec<String>>, base: &[&str]) -> Vec<String> {
    match over {
        Some(list) if !list.is_empty() => list.clone(),
        _ => owned(base),
    }
}

impl AlgorithmSet {
    pub fn defaults() -> Self {
        Self {
            profile: AlgorithmProfile::Default,
            kex: owned(DEFAULT_KEX),
            host_key: owned(DEFAULT_HOST_KEY),
            cipher: owned(DEFAULT_CIPHER),
            mac: owned(DEFAULT_MAC),
            compression: owned(DEFAULT_COMPRESSION),
        }
    }

    pub fn legacy() -> Self {
        Self {
            profile: AlgorithmProfile::Legacy,
            kex: owned(LEGACY_KEX),
            host_key: owned(LEGACY_HOST_KEY),
            cipher: owned(LEGACY_CIPHER),
            mac: owned(LEGACY_MAC),
            compression: owned(LEGACY_COMPRESSION),
        }
    }

    /// Apply caller overrides on top of the default set.
    pub fn resolve(overrides: Option<&AlgorithmOverrides>) -> Self {
        let Some(over) = overrides.filter(|o| !o.is_empty()) else {
            return Self::defaults();
        };
        if *over == legacy_overrides() {
            return Self::legacy();
        }
        Self {
            profile: AlgorithmProfile::Custom,
            kex: pick(&over.kex, DEFAULT_KEX),
            host_key: pick(&over.server_host_key, DEFAULT_HOST_KEY),
            cipher: pick(&over.cipher, DEFAULT_CIPHER),
            mac: pick(&over.hmac, DEFAULT_MAC),
            compression: pick(&over.compress, DEFAULT_COMPRESSION),
        }
    }

    /// Map onto russh preferences.
    ///
    /// Returns the preferences together with the subset of this set russh
    /// will actually offer. A category left empty after filtering keeps the
    /// russh default for that category.
    pub fn to_preferred(&self) -> (Preferred, AlgorithmSet) {
        let base = Preferred::default();

        let (kex_list, kex_names) = map_category("kex", &self.kex, kex_by_name);
        let (key_list, key_names) = map_category("host key", &self.host_key, host_key_by_name);
        let (cipher_list, cipher_names) = map_category("cipher", &self.cipher, cipher_by_name);
        let (mac_list, mac_names) = map_category("mac", &self.mac, mac_by_name);
        let (comp_list, comp_names) =
            map_category("compression", &self.compression, compression_by_name);

        let preferred = Preferred {
            kex: or_default(kex_list, base.kex.clone()),
            key: or_default(key_list, base.key.clone()),
            cipher: or_default(cipher_list, base.cipher.clone()),
            mac: or_default(mac_list, base.mac.clone()),
            compression: or_default(comp_list, base.compression.clone()),
            ..base
        };

        let offered = AlgorithmSet {
            profile: self.profile,
            kex: kex_names,
            host_key: key_names,
            cipher: cipher_names,
            mac: mac_names,
            compression: comp_names,
        };
        (preferred, offered)
    }
}

fn map_category<T>(
    category: &str,
    names: &[String],
    lookup: fn(&str) -> Option<T>,
) -> (Vec<T>, Vec<String>) {
    let mut mapped = Vec::with_capacity(names.len());
    let mut offered = Vec::with_capacity(names.len());
    for name in names {
        match lookup(name) {
            Some(alg) => {
                mapped.push(alg);
                offered.push(name.clone());
            }
            None => debug!("Skipping unsupported {} algorithm '{}'", category, name),
        }
    }
    if mapped.is_empty() {
        warn!(
            "No supported {} algorithms in {:?}, using library defaults",
            category, names
        );
    }
    (mapped, offered)
}

fn or_default<T: Clone>(list: Vec<T>, fallback: Cow<'static, [T]>) -> Cow<'static, [T]> {
    if list.is_empty() {
        fallback
    } else {
        Cow::Owned(list)
    }
}

fn kex_by_name(name: &str) -> Option<kex::Name> {
    Some(match name {
        "curve25519-sha256" => kex::CURVE25519,
        "curve25519-sha256@libssh.org" => kex::CURVE25519_PRE_RFC_8731,
        "diffie-hellman-group1-sha1" => kex::DH_G1_SHA1,
        "diffie-hellman-group14-sha1" => kex::DH_G14_SHA1,
        "diffie-hellman-group14-sha256" => kex::DH_G14_SHA256,
        "diffie-hellman-group16-sha512" => kex::DH_G16_SHA512,
        "diffie-hellman-group-exchange-sha1" => kex::DH_GEX_SHA1,
        "diffie-hellman-group-exchange-sha256" => kex::DH_GEX_SHA256,
        "ecdh-sha2-nistp256" => kex::ECDH_SHA2_NISTP256,
        "ecdh-sha2-nistp384" => kex::ECDH_SHA2_NISTP384,
        "ecdh-sha2-nistp521" => kex::ECDH_SHA2_NISTP521,
        _ => return None,
    })
}

fn host_key_by_name(name: &str) -> Option<Algorithm> {
    Some(match name {
        "ssh-ed25519" => Algorithm::Ed25519,
        "rsa-sha2-256" => Algorithm::Rsa {
            hash: Some(HashAlg::Sha256),
        },
        "rsa-sha2-512" => Algorithm::Rsa {
            hash: Some(HashAlg::Sha512),
        },
        "ssh-rsa" => Algorithm::Rsa { hash: None },
        "ecdsa-sha2-nistp256" => Algorithm::Ecdsa {
            curve: EcdsaCurve::NistP256,
        },
        "ecdsa-sha2-nistp384" => Algorithm::Ecdsa {
            curve: EcdsaCurve::NistP384,
        },
        "ecdsa-sha2-nistp521" => Algorithm::Ecdsa {
            curve: EcdsaCurve::NistP521,
        },
        "ssh-dss" => Algorithm::Dsa,
        _ => return None,
    })
}

fn cipher_by_name(name: &str) -> Option<cipher::Name> {
    Some(match name {
        "aes128-ctr" => cipher::AES_128_CTR,
        "aes192-ctr" => cipher::AES_192_CTR,
        "aes256-ctr" => cipher::AES_256_CTR,
        "aes128-cbc" => cipher::AES_128_CBC,
        "aes192-cbc" => cipher::AES_192_CBC,
        "aes256-cbc" => cipher::AES_256_CBC,
        "3des-cbc" => cipher::TRIPLE_DES_CBC,
        "aes128-gcm@openssh.com" => cipher::AES_128_GCM,
        "aes256-gcm@openssh.com" => cipher::AES_256_GCM,
        "chacha20-poly1305@openssh.com" => cipher::CHACHA20_POLY1305,
        _ => return None,
    })
}

fn mac_by_name(name: &str) -> Option<mac::Name> {
    Some(match name {
        "hmac-sha1" => mac::HMAC_SHA1,
        "hmac-sha2-256" => mac::HMAC_SHA256,
        "hmac-sha2-512" => mac::HMAC_SHA512,
        _ => return None,
    })
}

fn compression_by_name(name: &str) -> Option<compression::Name> {
    Some(match name {
        "none" => compression::NONE,
        "zlib" => compression::ZLIB,
        "zlib@openssh.com" => compression::ZLIB_LEGACY,
        _ => return None,
    })
}

/// Overrides that select the full legacy set.
pub fn legacy_overrides() -> AlgorithmOverrides {
    AlgorithmOverrides {
        kex: Some(owned(LEGACY_KEX)),
        server_host_key: Some(owned(LEGACY_HOST_KEY)),
        cipher: Some(owned(LEGACY_CIPHER)),
        hmac: Some(owned(LEGACY_MAC)),
        compress: Some(owned(LEGACY_COMPRESSION)),
    }
}

/// Derive the config for an operator-requested legacy retry.
pub fn legacy_retry_config(last: &ConnectionConfig) -> ConnectionConfig {
    let mut config = last.clone();
    config.algorithms = Some(legacy_overrides());
    config.auth_methods = Some(vec![
        AuthMethodKind::KeyboardInteractive.as_str().to_string(),
        AuthMethodKind::Password.as_str().to_string(),
    ]);
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_exclude_aead_ciphers() {
        let set = AlgorithmSet::resolve(None);
        assert_eq!(set.profile, AlgorithmProfile::Default);
        assert!(!set.cipher.iter().any(|c| c.contains("gcm") || c.contains("chacha20")));
        assert_eq!(set.kex[0], "diffie-hellman-group14-sha256");
    }

    #[test]
    fn test_override_replaces_single_category() {
        let over = AlgorithmOverrides {
            cipher: Some(vec!["aes256-ctr".to_string()]),
            ..Default::default()
        };
        let set = AlgorithmSet::resolve(Some(&over));
        let defaults = AlgorithmSet::defaults();

        assert_eq!(set.profile, AlgorithmProfile::Custom);
        assert_eq!(set.cipher, vec!["aes256-ctr"]);
        assert_eq!(set.kex, defaults.kex);
        assert_eq!(set.host_key, defaults.host_key);
        assert_eq!(set.mac, defaults.mac);
        assert_eq!(set.compression, defaults.compression);
    }

    #[test]
    fn test_empty_override_keeps_default() {
        let over = AlgorithmOverrides {
            kex: Some(vec![]),
            ..Default::default()
        };
        assert_eq!(AlgorithmSet::resolve(Some(&over)).kex, AlgorithmSet::defaults().kex);
    }

    #[test]
    fn test_legacy_prefers_oldest_first() {
        let set = AlgorithmSet::legacy();
        assert_eq!(set.kex[0], "diffie-hellman-group1-sha1");
        assert_eq!(set.host_key[0], "ssh-rsa");
        assert_eq!(set.cipher[0], "3des-cbc");
        assert_eq!(set.mac[0], "hmac-sha1");
        // modern algorithms still appended as fallback
        assert!(set.kex.contains(&"ecdh-sha2-nistp256".to_string()));
    }

    #[test]
    fn test_legacy_retry_config() {
        let last = ConnectionConfig::new("10.0.0.1", 2222, "admin").with_password("x");
        let retry = legacy_retry_config(&last);

        assert_eq!(retry.host, "10.0.0.1");
        assert_eq!(retry.port, 2222);
        assert_eq!(retry.password.as_ref().map(|p| p.expose()), Some("x"));
        assert_eq!(
            AlgorithmSet::resolve(retry.algorithms.as_ref()).profile,
            AlgorithmProfile::Legacy
        );
        assert_eq!(
            retry.resolved_auth_methods(&[AuthMethodKind::Password]),
            vec![AuthMethodKind::KeyboardInteractive, AuthMethodKind::Password]
        );
        // source config untouched
        assert!(last.algorithms.is_none());
    }

    #[test]
    fn test_to_preferred_skips_unsupported() {
        let (preferred, offered) = AlgorithmSet::defaults().to_preferred();

        assert_eq!(offered.cipher.last().map(String::as_str), Some("3des-cbc"));
        assert!(!offered.mac.contains(&"hmac-md5".to_string()));
        assert_eq!(offered.cipher[0], "aes128-ctr");
        assert_eq!(offered.cipher.len(), DEFAULT_CIPHER.len());
        assert_eq!(preferred.cipher.len(), offered.cipher.len());
        assert_eq!(preferred.kex.len(), DEFAULT_KEX.len());
        assert_eq!(preferred.compression.len(), 3);
    }

    #[test]
    fn test_legacy_offers_triple_des_first() {
        let (preferred, offered) = AlgorithmSet::legacy().to_preferred();

        assert_eq!(offered.cipher[0], "3des-cbc");
        assert_eq!(preferred.cipher[0], cipher::TRIPLE_DES_CBC);
        assert_eq!(offered.cipher.len(), LEGACY_CIPHER.len());
        assert_eq!(offered.mac, vec!["hmac-sha1", "hmac-sha2-256", "hmac-sha2-512"]);
    }

    #[test]
    fn test_to_preferred_all_unsupported_falls_back() {
        let over = AlgorithmOverrides {
            hmac: Some(vec!["hmac-md5".to_string()]),
            ..Default::default()
        };
        let (preferred, offered) = AlgorithmSet::resolve(Some(&over)).to_preferred();
        assert!(offered.mac.is_empty());
        assert!(!preferred.mac.is_empty());
    }
}
