//! Feature config values.
//!
//! A [`FeatureConfig`] is the persisted settings for one pluggable capability
//! of a client. The set of kinds is closed; which stores accept a kind is
//! decided by the [`ConfigInterface`]s it implements, so a single config may
//! satisfy several stores (a JWE config is both a tokenizer and an envelope).

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Capability a feature config store is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigInterface {
    /// Verifies signed client requests.
    Signature,
    /// Mints access tokens.
    Tokenizer,
    /// Fetches extra payload from an upstream service.
    Fetcher,
    /// Seals payloads for a recipient.
    Envelope,
}

impl ConfigInterface {
    /// Every interface, in declaration order.
    pub const ALL: [Self; 4] = [Self::Signature, Self::Tokenizer, Self::Fetcher, Self::Envelope];

    /// Resolves an interface by name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|interface| interface.name() == name)
    }

    /// The interface name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Signature => "signature",
            Self::Tokenizer => "tokenizer",
            Self::Fetcher => "fetcher",
            Self::Envelope => "envelope",
        }
    }
}

impl fmt::Display for ConfigInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Message digest used by request signatures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-256.
    #[default]
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

impl DigestAlgorithm {
    /// Parses a digest name as written in registration input.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Some(Self::Sha256),
            "sha384" => Some(Self::Sha384),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Canonical lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

/// Request-signature verification settings of one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureConfig {
    /// Digest the client signs with.
    pub digest: DigestAlgorithm,
    /// PEM-encoded RSA public key.
    pub public_key_pem: String,
    /// Seconds a signed request stays valid.
    pub ttl: u64,
    /// Seconds added to the declared request timestamp.
    pub skew: i64,
}

/// EdDSA JWT minting settings, holding the broker-generated key pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct JwtConfig {
    /// Session attributes copied into the token.
    pub claims: Vec<String>,
    /// Token lifetime in seconds.
    pub ttl: u64,
    /// Base64url Ed25519 seed.
    pub signing_key: String,
    /// Base64url Ed25519 public key, handed to the client at registration.
    pub public_key: String,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("claims", &self.claims)
            .field("ttl", &self.ttl)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Encrypted-token settings sealed to a client-supplied recipient key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JweConfig {
    /// Base64url 32-byte recipient key.
    pub recipient_key: String,
    /// Session attributes copied into the token.
    pub claims: Vec<String>,
    /// Token lifetime in seconds.
    pub ttl: u64,
}

/// HTTP method used by payload fetches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// `GET`.
    #[default]
    Get,
    /// `POST`.
    Post,
}

/// Upstream payload fetch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Absolute `http` or `https` URL.
    pub url: String,
    /// Request method.
    pub method: HttpMethod,
    /// Request timeout in seconds.
    pub timeout: u64,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
}

/// A persisted feature config of any kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeatureConfig {
    /// See [`SignatureConfig`].
    Signature(SignatureConfig),
    /// See [`JwtConfig`].
    Jwt(JwtConfig),
    /// See [`JweConfig`].
    Jwe(JweConfig),
    /// See [`FetchConfig`].
    Fetch(FetchConfig),
}

impl FeatureConfig {
    /// Every concrete type name.
    pub const TYPE_NAMES: [&'static str; 4] = ["signature", "jwt", "jwe", "fetch"];

    /// Type name of this config.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Signature(_) => "signature",
            Self::Jwt(_) => "jwt",
            Self::Jwe(_) => "jwe",
            Self::Fetch(_) => "fetch",
        }
    }

    /// Interfaces this config implements.
    #[must_use]
    pub fn interfaces(&self) -> &'static [ConfigInterface] {
        Self::interfaces_of(self.type_name()).unwrap_or(&[])
    }

    /// Interfaces implemented by the config type named `type_name`.
    #[must_use]
    pub fn interfaces_of(type_name: &str) -> Option<&'static [ConfigInterface]> {
        match type_name {
            "signature" => Some(&[ConfigInterface::Signature]),
            "jwt" => Some(&[ConfigInterface::Tokenizer]),
            "jwe" => Some(&[ConfigInterface::Tokenizer, ConfigInterface::Envelope]),
            "fetch" => Some(&[ConfigInterface::Fetcher]),
            _ => None,
        }
    }

    /// Returns `true` if this config can be used where `interface` is expected.
    #[must_use]
    pub fn implements(&self, interface: ConfigInterface) -> bool {
        self.interfaces().contains(&interface)
    }

    /// Attribute names the config copies into issued tokens, if it mints tokens.
    #[must_use]
    pub fn claims(&self) -> Option<&[String]> {
        match self {
            Self::Jwt(config) => Some(&config.claims),
            Self::Jwe(config) => Some(&config.claims),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_names_resolve() {
        for interface in ConfigInterface::ALL {
            assert_eq!(ConfigInterface::from_name(interface.name()), Some(interface));
        }
        assert_eq!(ConfigInterface::from_name("jwt"), None);
    }

    #[test]
    fn test_jwe_implements_two_interfaces() {
        let config = FeatureConfig::Jwe(JweConfig {
            recipient_key: "AAAA".into(),
            claims: vec!["email".into()],
            ttl: 60,
        });
        assert!(config.implements(ConfigInterface::Tokenizer));
        assert!(config.implements(ConfigInterface::Envelope));
        assert!(!config.implements(ConfigInterface::Signature));
    }

    #[test]
    fn test_every_type_name_has_interfaces() {
        for name in FeatureConfig::TYPE_NAMES {
            assert!(FeatureConfig::interfaces_of(name).is_some_and(|i| !i.is_empty()));
        }
    }

    #[test]
    fn test_digest_names() {
        assert_eq!(DigestAlgorithm::from_name("SHA-384"), Some(DigestAlgorithm::Sha384));
        assert_eq!(DigestAlgorithm::from_name("sha512"), Some(DigestAlgorithm::Sha512));
        assert_eq!(DigestAlgorithm::from_name("md5"), None);
    }

    #[test]
    fn test_jwt_debug_hides_signing_key() {
        let config = JwtConfig {
            claims: vec![],
            ttl: 1,
            signing_key: "very-secret".into(),
            public_key: "pub".into(),
        };
        assert!(!format!("{config:?}").contains("very-secret"));
    }
}
