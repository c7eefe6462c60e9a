//! Feature config factories.
//!
//! A factory turns one feature's raw registration settings into a validated
//! [`FeatureConfig`] plus optional public output returned to the registrar.
//! Factories are selected by `(key, hash)`: the key is the feature key of the
//! registration input, the hash is the `#` discriminant (defaulting to the
//! key), which lets one feature key map to several implementations.

mod fetch;
mod jwe;
mod jwt;
mod signature;

use std::sync::Arc;

use serde_json::{Map, Value};

pub use self::{
    fetch::FetchFactory,
    jwe::JweFactory,
    jwt::JwtFactory,
    signature::{SignatureFactory, parse_rsa_public_key},
};
use crate::{config::FeatureConfig, error::BrokerError};

/// Raw settings of one feature, as decoded from registration input.
pub type RawSettings = Map<String, Value>;

/// Settings field naming the implementation discriminant.
pub const DISCRIMINANT_FIELD: &str = "#";

/// Builds a validated feature config from raw settings.
pub trait FeatureConfigFactory: Send + Sync {
    /// Feature key this factory serves.
    fn key(&self) -> &str;

    /// Implementation discriminant.
    fn hash(&self) -> &str;

    /// Validates `settings` and builds the config.
    ///
    /// Returns the config and the public output to hand back to the
    /// registrar, if any.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Validation`] listing every violated field.
    fn create(&self, settings: &RawSettings) -> Result<(FeatureConfig, Option<Value>), BrokerError>;

    /// Returns `true` if this factory serves `key` with the discriminant in `settings`.
    fn matches(&self, key: &str, settings: &RawSettings) -> bool {
        let hash = settings.get(DISCRIMINANT_FIELD).and_then(Value::as_str).unwrap_or(key);
        self.key() == key && self.hash() == hash
    }
}

/// The stock factories: `signature`, `token#jwt`, `token#jwe`, `payload#fetch`.
#[must_use]
pub fn default_factories() -> Vec<Arc<dyn FeatureConfigFactory>> {
    vec![
        Arc::new(SignatureFactory::new("signature")),
        Arc::new(JwtFactory::new("token")),
        Arc::new(JweFactory::new("token")),
        Arc::new(FetchFactory::new("payload")),
    ]
}

/// Collects every validation failure of one feature before reporting.
#[derive(Debug)]
pub struct ValidationErrors {
    key: String,
    messages: Vec<String>,
}

impl ValidationErrors {
    /// Starts collecting for feature `key`.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), messages: Vec::new() }
    }

    /// Records that `<key>.<subkey>` violates `reason`.
    pub fn add(&mut self, subkey: &str, reason: impl AsRef<str>) {
        self.messages.push(format!("The \"{}.{}\" parameter {}.", self.key, subkey, reason.as_ref()));
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Fails with every recorded message, newline-joined, or passes `value` through.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Validation`] if any message was recorded.
    pub fn finish<T>(self, value: impl FnOnce() -> T) -> Result<T, BrokerError> {
        if self.messages.is_empty() {
            Ok(value())
        } else {
            Err(BrokerError::Validation(self.messages.join("\n")))
        }
    }

    /// Reads a required non-empty string.
    pub fn required_str<'a>(&mut self, settings: &'a RawSettings, subkey: &str) -> Option<&'a str> {
        match settings.get(subkey) {
            None | Some(Value::Null) => {
                self.add(subkey, "is required");
                None
            },
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.as_str()),
            Some(_) => {
                self.add(subkey, "must be a non-empty string");
                None
            },
        }
    }

    /// Reads an optional string.
    pub fn optional_str<'a>(&mut self, settings: &'a RawSettings, subkey: &str) -> Option<&'a str> {
        match settings.get(subkey) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.as_str()),
            Some(_) => {
                self.add(subkey, "must be a string");
                None
            },
        }
    }

    /// Reads an optional non-negative integer, falling back to `default`.
    pub fn non_negative(&mut self, settings: &RawSettings, subkey: &str, default: u64) -> u64 {
        match settings.get(subkey) {
            None | Some(Value::Null) => default,
            Some(value) => match value.as_u64() {
                Some(n) => n,
                None => {
                    self.add(subkey, "must be a non-negative integer");
                    default
                },
            },
        }
    }

    /// Reads an optional signed integer, falling back to `default`.
    pub fn integer(&mut self, settings: &RawSettings, subkey: &str, default: i64) -> i64 {
        match settings.get(subkey) {
            None | Some(Value::Null) => default,
            Some(value) => match value.as_i64() {
                Some(n) => n,
                None => {
                    self.add(subkey, "must be an integer");
                    default
                },
            },
        }
    }

    /// Reads an optional list of non-empty strings.
    pub fn string_list(&mut self, settings: &RawSettings, subkey: &str) -> Vec<String> {
        match settings.get(subkey) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => {
                let strings: Vec<String> =
                    items.iter().filter_map(Value::as_str).filter(|s| !s.is_empty()).map(str::to_owned).collect();
                if strings.len() != items.len() {
                    self.add(subkey, "must be a list of non-empty strings");
                }
                strings
            },
            Some(_) => {
                self.add(subkey, "must be a list of non-empty strings");
                Vec::new()
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn settings(value: Value) -> RawSettings {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_matches_uses_key_as_default_discriminant() {
        let factory = SignatureFactory::new("signature");
        assert!(factory.matches("signature", &settings(json!({}))));
        assert!(factory.matches("signature", &settings(json!({"#": "signature"}))));
        assert!(!factory.matches("signature", &settings(json!({"#": "hmac"}))));
        assert!(!factory.matches("token", &settings(json!({}))));

        let renamed = SignatureFactory::new("sig");
        assert!(renamed.matches("sig", &settings(json!({}))));
        assert!(renamed.matches("sig", &settings(json!({"#": "sig"}))));
        assert!(!renamed.matches("signature", &settings(json!({}))));

        let jwt = JwtFactory::new("token");
        assert!(jwt.matches("token", &settings(json!({"#": "jwt"}))));
        assert!(!jwt.matches("token", &settings(json!({}))));
    }

    #[test]
    fn test_errors_aggregate_in_order() {
        let mut errors = ValidationErrors::new("payload");
        let raw = settings(json!({"url": 5, "timeout": -1}));
        errors.required_str(&raw, "url");
        errors.non_negative(&raw, "timeout", 5);
        errors.required_str(&raw, "method");

        let err = errors.finish(|| ()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "The \"payload.url\" parameter must be a non-empty string.\n\
             The \"payload.timeout\" parameter must be a non-negative integer.\n\
             The \"payload.method\" parameter is required."
        );
    }

    #[test]
    fn test_string_list() {
        let mut errors = ValidationErrors::new("token");
        assert_eq!(errors.string_list(&settings(json!({"claims": ["a", "b"]})), "claims"), vec!["a", "b"]);
        assert!(errors.is_empty());

        errors.string_list(&settings(json!({"claims": ["a", 1]})), "claims");
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_default_factories_are_unique_per_key_and_hash() {
        let factories = default_factories();
        let mut pairs: Vec<(String, String)> =
            factories.iter().map(|f| (f.key().to_owned(), f.hash().to_owned())).collect();
        let total = pairs.len();
        pairs.sort();
        pairs.dedup();
        assert_eq!(pairs.len(), total);
    }
}
