//! Interface-guarded serialization of feature configs.

use tracing::debug;

use crate::{
    config::{ConfigInterface, FeatureConfig},
    error::BrokerError,
};

/// Something a marshaller can be asked about: a config value or a name.
///
/// A name may be a concrete config type (`"jwe"`) or an interface
/// (`"tokenizer"`).
#[derive(Debug, Clone, Copy)]
pub enum ConfigSubject<'a> {
    /// A config value.
    Value(&'a FeatureConfig),
    /// A type or interface name.
    Name(&'a str),
}

impl<'a> From<&'a FeatureConfig> for ConfigSubject<'a> {
    fn from(config: &'a FeatureConfig) -> Self {
        Self::Value(config)
    }
}

impl<'a> From<&'a str> for ConfigSubject<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

/// Serializes feature configs assignable to one bound interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigMarshaller {
    interface: ConfigInterface,
}

impl ConfigMarshaller {
    /// Binds a marshaller to `interface`.
    #[must_use]
    pub const fn new(interface: ConfigInterface) -> Self {
        Self { interface }
    }

    /// Binds a marshaller to the interface named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Type`] if `name` is a concrete config type
    /// rather than an interface, and [`BrokerError::Config`] if it names
    /// nothing at all.
    pub fn for_interface(name: &str) -> Result<Self, BrokerError> {
        if let Some(interface) = ConfigInterface::from_name(name) {
            return Ok(Self::new(interface));
        }
        if FeatureConfig::interfaces_of(name).is_some() {
            return Err(BrokerError::Type(format!("'{name}' is a config type, not a config interface")));
        }
        Err(tessera_storage::ConfigError::invalid("features.interface", format!("unknown interface '{name}'")).into())
    }

    /// The bound interface.
    #[must_use]
    pub const fn interface(&self) -> ConfigInterface {
        self.interface
    }

    /// Returns `true` if `subject` is assignable to the bound interface.
    pub fn supports<'a>(&self, subject: impl Into<ConfigSubject<'a>>) -> bool {
        match subject.into() {
            ConfigSubject::Value(config) => config.implements(self.interface),
            ConfigSubject::Name(name) => {
                name == self.interface.name()
                    || FeatureConfig::interfaces_of(name).is_some_and(|i| i.contains(&self.interface))
            },
        }
    }

    /// Serializes `config`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Type`] if `config` does not implement the
    /// bound interface.
    pub fn marshall(&self, config: &FeatureConfig) -> Result<Vec<u8>, BrokerError> {
        if !self.supports(config) {
            return Err(BrokerError::Type(format!(
                "'{}' config is not a {} config",
                config.type_name(),
                self.interface
            )));
        }
        serde_json::to_vec(config).map_err(|e| BrokerError::internal(format!("failed to serialize config: {e}")))
    }

    /// Deserializes a config previously produced by [`marshall`](Self::marshall).
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Domain`] if `bytes` are corrupt or decode to a
    /// config that does not implement the bound interface.
    pub fn unmarshall(&self, bytes: &[u8]) -> Result<FeatureConfig, BrokerError> {
        let config: FeatureConfig = serde_json::from_slice(bytes).map_err(|e| {
            debug!(interface = %self.interface, error = %e, "Undecodable feature config");
            BrokerError::domain("corrupt feature config")
        })?;
        if !config.implements(self.interface) {
            return Err(BrokerError::domain(format!(
                "stored '{}' config is not a {} config",
                config.type_name(),
                self.interface
            )));
        }
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::config::{DigestAlgorithm, FetchConfig, HttpMethod, JweConfig, SignatureConfig};

    fn signature() -> FeatureConfig {
        FeatureConfig::Signature(SignatureConfig {
            digest: DigestAlgorithm::Sha256,
            public_key_pem: "-----BEGIN PUBLIC KEY-----".into(),
            ttl: 60,
            skew: 0,
        })
    }

    #[test]
    fn test_construction_by_name() {
        assert_eq!(ConfigMarshaller::for_interface("tokenizer").unwrap().interface(), ConfigInterface::Tokenizer);
        assert!(matches!(ConfigMarshaller::for_interface("jwt"), Err(BrokerError::Type(_))));
        assert!(matches!(ConfigMarshaller::for_interface("nope"), Err(BrokerError::Config(_))));
    }

    #[test]
    fn test_supports_values_and_names() {
        let marshaller = ConfigMarshaller::new(ConfigInterface::Envelope);
        assert!(marshaller.supports("jwe"));
        assert!(marshaller.supports("envelope"));
        assert!(!marshaller.supports("jwt"));
        assert!(!marshaller.supports("unknown"));
        assert!(!marshaller.supports(&signature()));
    }

    #[test]
    fn test_marshall_rejects_foreign_config() {
        let marshaller = ConfigMarshaller::new(ConfigInterface::Fetcher);
        assert!(matches!(marshaller.marshall(&signature()), Err(BrokerError::Type(_))));
    }

    #[test]
    fn test_round_trip() {
        let marshaller = ConfigMarshaller::new(ConfigInterface::Signature);
        let bytes = marshaller.marshall(&signature()).unwrap();
        assert_eq!(marshaller.unmarshall(&bytes).unwrap(), signature());
    }

    #[test]
    fn test_unmarshall_rejects_corrupt_and_foreign_values() {
        let signature_marshaller = ConfigMarshaller::new(ConfigInterface::Signature);
        assert!(matches!(signature_marshaller.unmarshall(b"\x00garbage"), Err(BrokerError::Domain(_))));

        let fetch = FeatureConfig::Fetch(FetchConfig {
            url: "https://upstream.example/profile".into(),
            method: HttpMethod::Post,
            timeout: 5,
            headers: BTreeMap::new(),
        });
        let bytes = ConfigMarshaller::new(ConfigInterface::Fetcher).marshall(&fetch).unwrap();
        assert!(matches!(signature_marshaller.unmarshall(&bytes), Err(BrokerError::Domain(_))));
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        fn arb_config() -> impl Strategy<Value = FeatureConfig> {
            let claims = proptest::collection::vec("[a-z_]{1,12}", 0..5);
            prop_oneof![
                ("[ -~]{0,64}", any::<u64>(), any::<i64>()).prop_map(|(pem, ttl, skew)| {
                    FeatureConfig::Signature(SignatureConfig {
                        digest: DigestAlgorithm::Sha512,
                        public_key_pem: pem,
                        ttl,
                        skew,
                    })
                }),
                (claims.clone(), any::<u64>(), "[A-Za-z0-9_-]{43}").prop_map(|(claims, ttl, key)| {
                    FeatureConfig::Jwe(JweConfig { recipient_key: key, claims, ttl })
                }),
                (
                    "https://[a-z]{1,10}\\.example/[a-z]{0,8}",
                    1u64..600,
                    proptest::collection::btree_map("[a-z-]{1,10}", "[ -~]{0,20}", 0..4)
                )
                    .prop_map(|(url, timeout, headers)| {
                        FeatureConfig::Fetch(FetchConfig { url, method: HttpMethod::Get, timeout, headers })
                    }),
            ]
        }

        proptest! {
            #[test]
            fn round_trips_through_every_accepting_interface(config in arb_config()) {
                for interface in config.interfaces() {
                    let marshaller = ConfigMarshaller::new(*interface);
                    let bytes = marshaller.marshall(&config).unwrap();
                    prop_assert_eq!(marshaller.unmarshall(&bytes).unwrap(), config.clone());
                }
            }
        }
    }
}
