use std::collections::BTreeMap;

use serde_json::Value;

use super::{FeatureConfigFactory, RawSettings, ValidationErrors};
use crate::{
    config::{FeatureConfig, FetchConfig, HttpMethod},
    error::BrokerError,
};

/// Default upstream timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT: u64 = 5;

/// Builds [`FetchConfig`]s from `{ "url", "method", "timeout", "headers" }`.
#[derive(Debug, Clone)]
pub struct FetchFactory {
    key: String,
}

impl FetchFactory {
    /// Creates a factory serving feature `key`.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl FeatureConfigFactory for FetchFactory {
    fn key(&self) -> &str {
        &self.key
    }

    fn hash(&self) -> &str {
        "fetch"
    }

    fn create(&self, settings: &RawSettings) -> Result<(FeatureConfig, Option<Value>), BrokerError> {
        let mut errors = ValidationErrors::new(&self.key);

        let url = errors.required_str(settings, "url").map(str::to_owned);
        if let Some(url) = &url
            && !is_http_url(url)
        {
            errors.add("url", "must be an absolute http or https URL");
        }

        let method = match errors.optional_str(settings, "method") {
            None => HttpMethod::default(),
            Some(name) => match name.to_ascii_uppercase().as_str() {
                "GET" => HttpMethod::Get,
                "POST" => HttpMethod::Post,
                _ => {
                    errors.add("method", "must be GET or POST");
                    HttpMethod::default()
                },
            },
        };

        let timeout = errors.non_negative(settings, "timeout", DEFAULT_FETCH_TIMEOUT);
        if timeout == 0 {
            errors.add("timeout", "must be positive");
        }

        let mut headers = BTreeMap::new();
        match settings.get("headers") {
            None | Some(Value::Null) => {},
            Some(Value::Object(map)) => {
                for (name, value) in map {
                    match value.as_str() {
                        Some(value) => {
                            headers.insert(name.clone(), value.to_owned());
                        },
                        None => errors.add(&format!("headers.{name}"), "must be a string"),
                    }
                }
            },
            Some(_) => errors.add("headers", "must be a map of strings"),
        }

        errors.finish(|| {
            let config = FetchConfig { url: url.unwrap_or_default(), method, timeout, headers };
            (FeatureConfig::Fetch(config), None)
        })
    }
}

fn is_http_url(url: &str) -> bool {
    let rest = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://"));
    rest.is_some_and(|rest| {
        let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
        !host.is_empty() && !host.contains(char::is_whitespace)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;

    fn create(value: Value) -> Result<(FeatureConfig, Option<Value>), BrokerError> {
        FetchFactory::new("payload").create(value.as_object().unwrap())
    }

    #[test]
    fn test_defaults() {
        let (config, _) = create(json!({"#": "fetch", "url": "https://upstream.example/profile"})).unwrap();
        let FeatureConfig::Fetch(config) = config else { panic!("expected a fetch config") };
        assert_eq!(config.method, HttpMethod::Get);
        assert_eq!(config.timeout, DEFAULT_FETCH_TIMEOUT);
        assert!(config.headers.is_empty());
    }

    #[test]
    fn test_headers_and_method() {
        let (config, _) = create(json!({
            "url": "http://10.0.0.5:8080/attrs",
            "method": "post",
            "headers": {"x-api-key": "k"},
        }))
        .unwrap();
        let FeatureConfig::Fetch(config) = config else { panic!("expected a fetch config") };
        assert_eq!(config.method, HttpMethod::Post);
        assert_eq!(config.headers.get("x-api-key").map(String::as_str), Some("k"));
    }

    #[test]
    fn test_reports_every_violation() {
        let err = create(json!({"url": "ftp://x", "method": "DELETE", "timeout": 0, "headers": {"a": 1}})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "The \"payload.url\" parameter must be an absolute http or https URL.\n\
             The \"payload.method\" parameter must be GET or POST.\n\
             The \"payload.timeout\" parameter must be positive.\n\
             The \"payload.headers.a\" parameter must be a string."
        );
    }

    #[test]
    fn test_url_check() {
        assert!(is_http_url("https://a.example"));
        assert!(!is_http_url("https://"));
        assert!(!is_http_url("https:///path"));
        assert!(!is_http_url("upstream.example"));
    }
}
