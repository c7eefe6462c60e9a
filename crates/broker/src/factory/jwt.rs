use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::SigningKey;
use rand_core::OsRng;
use serde_json::{Value, json};

use super::{FeatureConfigFactory, RawSettings, ValidationErrors};
use crate::{
    config::{FeatureConfig, JwtConfig},
    error::BrokerError,
};

/// Default token lifetime in seconds.
pub const DEFAULT_TOKEN_TTL: u64 = 300;

/// Builds [`JwtConfig`]s, generating a fresh Ed25519 key pair per client.
///
/// The public key is returned to the registrar so the client can verify
/// tokens minted on its behalf.
#[derive(Debug, Clone)]
pub struct JwtFactory {
    key: String,
}

impl JwtFactory {
    /// Creates a factory serving feature `key`.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl FeatureConfigFactory for JwtFactory {
    fn key(&self) -> &str {
        &self.key
    }

    fn hash(&self) -> &str {
        "jwt"
    }

    fn create(&self, settings: &RawSettings) -> Result<(FeatureConfig, Option<Value>), BrokerError> {
        let mut errors = ValidationErrors::new(&self.key);
        let claims = errors.string_list(settings, "claims");
        let ttl = errors.non_negative(settings, "ttl", DEFAULT_TOKEN_TTL);

        errors.finish(|| {
            let signing_key = SigningKey::generate(&mut OsRng);
            let public_key = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().as_bytes());
            let output = json!({ "alg": "EdDSA", "public_key": public_key });
            let config = JwtConfig {
                claims,
                ttl,
                signing_key: URL_SAFE_NO_PAD.encode(signing_key.to_bytes()),
                public_key,
            };
            (FeatureConfig::Jwt(config), Some(output))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_generates_key_pair_and_public_output() {
        let settings = json!({"#": "jwt", "claims": ["email"]});
        let (config, output) = JwtFactory::new("token").create(settings.as_object().unwrap()).unwrap();
        let FeatureConfig::Jwt(config) = config else { panic!("expected a jwt config") };

        assert_eq!(config.claims, vec!["email".to_owned()]);
        assert_eq!(config.ttl, DEFAULT_TOKEN_TTL);

        let output = output.unwrap();
        assert_eq!(output["alg"], "EdDSA");
        assert_eq!(output["public_key"], config.public_key.as_str());
        assert_eq!(URL_SAFE_NO_PAD.decode(&config.public_key).unwrap().len(), 32);

        let seed: [u8; 32] = URL_SAFE_NO_PAD.decode(&config.signing_key).unwrap().try_into().unwrap();
        let derived = SigningKey::from_bytes(&seed).verifying_key();
        assert_eq!(URL_SAFE_NO_PAD.encode(derived.as_bytes()), config.public_key);
    }

    #[test]
    fn test_each_client_gets_its_own_key() {
        let factory = JwtFactory::new("token");
        let settings = serde_json::Map::new();
        let (a, _) = factory.create(&settings).unwrap();
        let (b, _) = factory.create(&settings).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_settings() {
        let settings = json!({"claims": "email", "ttl": "soon"});
        let err = JwtFactory::new("token").create(settings.as_object().unwrap()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "The \"token.claims\" parameter must be a list of non-empty strings.\n\
             The \"token.ttl\" parameter must be a non-negative integer."
        );
    }
}
