//! Broker configuration.
//!
//! [`BrokerConfig`] deserializes from any serde format (durations are
//! written in humantime form, e.g. `"30d"`) or is assembled with
//! [`BrokerConfig::builder`]. Either way it must pass
//! [`validate`](BrokerConfig::validate) before it is used.
//!
//! # Example
//!
//! ```
//! use tessera_broker::settings::BrokerConfig;
//!
//! let config: BrokerConfig = serde_json::from_str(r#"{
//!     "encryption": { "keys": ["AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"] },
//!     "sessions": { "realms": { "main": { "lifetime": "8h" } } },
//!     "registration": { "inactivity": "90d", "max_clients": 10000 }
//! }"#)?;
//! config.validate()?;
//! assert_eq!(config.features().len(), 4);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::{collections::BTreeMap, time::Duration};

use base64::{
    Engine,
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD},
};
use serde::{Deserialize, Serialize};
use tessera_storage::ConfigError;
use zeroize::Zeroizing;

use crate::{
    config::ConfigInterface,
    crypto::{SERVER_KEY_LEN, ServerKey},
    registry::DEFAULT_REGISTRY_NAMESPACE,
    types::Realm,
};

/// Default idle period after which a client is purged.
pub const DEFAULT_INACTIVITY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default session lifetime.
pub const DEFAULT_SESSION_LIFETIME: Duration = Duration::from_secs(8 * 60 * 60);

/// Server key settings.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptionConfig {
    /// Base64 32-byte keys. The first one encrypts; all are tried on decrypt.
    pub keys: Vec<String>,
}

impl EncryptionConfig {
    /// Decodes the configured keys.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if no key is configured or a key is not
    /// base64 of exactly 32 bytes.
    pub fn server_keys(&self) -> Result<Vec<ServerKey>, ConfigError> {
        if self.keys.is_empty() {
            return Err(ConfigError::Missing { field: "encryption.keys" });
        }
        self.keys
            .iter()
            .enumerate()
            .map(|(index, encoded)| {
                let bytes = Zeroizing::new(decode_base64(encoded.trim()).ok_or_else(|| {
                    ConfigError::invalid("encryption.keys", format!("key #{index} is not valid base64"))
                })?);
                let key: [u8; SERVER_KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
                    ConfigError::invalid(
                        "encryption.keys",
                        format!("key #{index} must be {SERVER_KEY_LEN} bytes, got {}", bytes.len()),
                    )
                })?;
                Ok(Zeroizing::new(key))
            })
            .collect()
    }
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig").field("keys", &self.keys.len()).finish()
    }
}

fn decode_base64(encoded: &str) -> Option<Vec<u8>> {
    [&URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD].into_iter().find_map(|engine| engine.decode(encoded).ok())
}

/// Session pool settings of one realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RealmConfig {
    /// Session lifetime; `None` keeps sessions until removed.
    #[serde(with = "humantime_serde", default = "default_session_lifetime")]
    pub lifetime: Option<Duration>,
}

fn default_session_lifetime() -> Option<Duration> {
    Some(DEFAULT_SESSION_LIFETIME)
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self { lifetime: default_session_lifetime() }
    }
}

/// Session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionsConfig {
    /// Realm name to pool settings.
    pub realms: BTreeMap<Realm, RealmConfig>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self { realms: BTreeMap::from([(Realm::from("main"), RealmConfig::default())]) }
    }
}

/// Declares one feature config store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureDeclaration {
    /// Store namespace; also the feature key registrations use.
    pub key: String,
    /// Interface accepted configs implement.
    pub interface: ConfigInterface,
    /// Whether every registration must supply a config for this store.
    #[serde(default)]
    pub required: bool,
}

impl FeatureDeclaration {
    /// Creates a declaration.
    #[must_use]
    pub fn new(key: impl Into<String>, interface: ConfigInterface, required: bool) -> Self {
        Self { key: key.into(), interface, required }
    }
}

/// Store layout of a stock deployment: required `signature` and `token`,
/// optional `envelope` and `payload`.
#[must_use]
pub fn default_features() -> Vec<FeatureDeclaration> {
    vec![
        FeatureDeclaration::new("signature", ConfigInterface::Signature, true),
        FeatureDeclaration::new("token", ConfigInterface::Tokenizer, true),
        FeatureDeclaration::new("envelope", ConfigInterface::Envelope, false),
        FeatureDeclaration::new("payload", ConfigInterface::Fetcher, false),
    ]
}

/// Registration and client lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrationConfig {
    /// Registry namespace.
    #[serde(default = "default_registry_namespace")]
    pub namespace: String,

    /// Idle period after which maintenance purges a client.
    #[serde(with = "humantime_serde", default = "default_inactivity")]
    pub inactivity: Duration,

    /// Maximum number of registered clients; the oldest are evicted beyond it.
    #[serde(default)]
    pub max_clients: Option<u64>,
}

fn default_registry_namespace() -> String {
    DEFAULT_REGISTRY_NAMESPACE.to_owned()
}

fn default_inactivity() -> Duration {
    DEFAULT_INACTIVITY
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self { namespace: default_registry_namespace(), inactivity: default_inactivity(), max_clients: None }
    }
}

/// Complete broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// Server keys.
    pub(crate) encryption: EncryptionConfig,

    /// Session realms.
    #[serde(default)]
    pub(crate) sessions: SessionsConfig,

    /// Feature config stores.
    #[serde(default = "default_features")]
    pub(crate) features: Vec<FeatureDeclaration>,

    /// Registration and lifecycle.
    #[serde(default)]
    pub(crate) registration: RegistrationConfig,
}

#[bon::bon]
impl BrokerConfig {
    /// Creates a validated configuration.
    ///
    /// # Arguments
    ///
    /// * `keys` - Base64 32-byte server keys, primary first. At least one is required.
    ///
    /// # Optional Fields
    ///
    /// * `realms` - Session realms (default: `main` with an 8 hour lifetime).
    /// * `features` - Feature config stores (default: required `signature` and `token`, optional
    ///   `envelope` and `payload`).
    /// * `registration` - Registration settings (default: 30 day inactivity, no client cap).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if [`validate`](Self::validate) fails.
    #[builder]
    pub fn new(
        #[builder(with = |iter: impl IntoIterator<Item = impl Into<String>>| {
            iter.into_iter().map(Into::into).collect()
        })]
        keys: Vec<String>,
        #[builder(default)] realms: SessionsConfig,
        #[builder(default = default_features())] features: Vec<FeatureDeclaration>,
        #[builder(default)] registration: RegistrationConfig,
    ) -> Result<Self, ConfigError> {
        let config = Self { encryption: EncryptionConfig { keys }, sessions: realms, features, registration };
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if keys are missing or malformed, no realm is
    /// configured, a feature key is empty or repeated, or `max_clients` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.encryption.server_keys()?;

        if self.sessions.realms.is_empty() {
            return Err(ConfigError::Missing { field: "sessions.realms" });
        }

        let mut seen = std::collections::HashSet::new();
        for feature in &self.features {
            if feature.key.trim().is_empty() {
                return Err(ConfigError::invalid("features.key", "feature key cannot be empty"));
            }
            if !seen.insert(feature.key.as_str()) {
                return Err(ConfigError::invalid("features.key", format!("duplicate feature '{}'", feature.key)));
            }
            if feature.key == self.registration.namespace {
                return Err(ConfigError::invalid(
                    "features.key",
                    format!("feature '{}' collides with the registry namespace", feature.key),
                ));
            }
        }

        if self.registration.max_clients == Some(0) {
            return Err(ConfigError::BelowMinimum {
                field: "registration.max_clients",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    /// Server key settings.
    #[must_use]
    pub fn encryption(&self) -> &EncryptionConfig {
        &self.encryption
    }

    /// Session realms.
    #[must_use]
    pub fn sessions(&self) -> &SessionsConfig {
        &self.sessions
    }

    /// Feature config store declarations.
    #[must_use]
    pub fn features(&self) -> &[FeatureDeclaration] {
        &self.features
    }

    /// Registration settings.
    #[must_use]
    pub fn registration(&self) -> &RegistrationConfig {
        &self.registration
    }
}
