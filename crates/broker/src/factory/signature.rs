use rsa::{RsaPublicKey, pkcs1::DecodeRsaPublicKey, pkcs8::DecodePublicKey};
use serde_json::Value;

use super::{FeatureConfigFactory, RawSettings, ValidationErrors};
use crate::{
    config::{DigestAlgorithm, FeatureConfig, SignatureConfig},
    error::BrokerError,
};

/// Default signed-request lifetime in seconds.
pub const DEFAULT_SIGNATURE_TTL: u64 = 60;

/// Builds [`SignatureConfig`]s from `{ "md-alg", "key", "ttl", "skew" }`.
///
/// The discriminant is the feature key itself, so no `"#"` field is needed.
#[derive(Debug, Clone)]
pub struct SignatureFactory {
    key: String,
}

impl SignatureFactory {
    /// Creates a factory serving feature `key`.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Parses an RSA public key in SPKI (`PUBLIC KEY`) or PKCS#1 (`RSA PUBLIC KEY`) PEM form.
#[must_use]
pub fn parse_rsa_public_key(pem: &str) -> Option<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem.trim()).ok().or_else(|| RsaPublicKey::from_pkcs1_pem(pem.trim()).ok())
}

impl FeatureConfigFactory for SignatureFactory {
    fn key(&self) -> &str {
        &self.key
    }

    fn hash(&self) -> &str {
        &self.key
    }

    fn create(&self, settings: &RawSettings) -> Result<(FeatureConfig, Option<Value>), BrokerError> {
        let mut errors = ValidationErrors::new(&self.key);

        let digest = match errors.optional_str(settings, "md-alg") {
            None => DigestAlgorithm::default(),
            Some(name) => DigestAlgorithm::from_name(name).unwrap_or_else(|| {
                errors.add("md-alg", "must be one of sha256, sha384, sha512");
                DigestAlgorithm::default()
            }),
        };

        let public_key_pem = errors.required_str(settings, "key").map(str::to_owned);
        if let Some(pem) = &public_key_pem
            && parse_rsa_public_key(pem).is_none()
        {
            errors.add("key", "must be a PEM-encoded RSA public key");
        }

        let ttl = errors.non_negative(settings, "ttl", DEFAULT_SIGNATURE_TTL);
        let skew = errors.integer(settings, "skew", 0);

        errors.finish(|| {
            let config = SignatureConfig { digest, public_key_pem: public_key_pem.unwrap_or_default(), ttl, skew };
            (FeatureConfig::Signature(config), None)
        })
    }
}
