use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::Value;

use super::{FeatureConfigFactory, RawSettings, ValidationErrors, jwt::DEFAULT_TOKEN_TTL};
use crate::{
    config::{FeatureConfig, JweConfig},
    error::BrokerError,
};

const RECIPIENT_KEY_LEN: usize = 32;

/// Builds [`JweConfig`]s sealed to a client-supplied recipient key.
#[derive(Debug, Clone)]
pub struct JweFactory {
    key: String,
}

impl JweFactory {
    /// Creates a factory serving feature `key`.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl FeatureConfigFactory for JweFactory {
    fn key(&self) -> &str {
        &self.key
    }

    fn hash(&self) -> &str {
        "jwe"
    }

    fn create(&self, settings: &RawSettings) -> Result<(FeatureConfig, Option<Value>), BrokerError> {
        let mut errors = ValidationErrors::new(&self.key);

        let recipient_key = errors.required_str(settings, "key").map(str::to_owned);
        if let Some(encoded) = &recipient_key {
            let valid = URL_SAFE_NO_PAD
                .decode(encoded.trim_end_matches('='))
                .is_ok_and(|bytes| bytes.len() == RECIPIENT_KEY_LEN);
            if !valid {
                errors.add("key", "must be a base64url-encoded 32-byte key");
            }
        }
        let claims = errors.string_list(settings, "claims");
        let ttl = errors.non_negative(settings, "ttl", DEFAULT_TOKEN_TTL);

        errors.finish(|| {
            let config = JweConfig { recipient_key: recipient_key.unwrap_or_default(), claims, ttl };
            (FeatureConfig::Jwe(config), None)
        })
    }
}
