//! Access token issuance.
//!
//! [`TokenIssuer`] combines a session with a client's token config: it loads
//! the user's attributes by ticket, optionally enriches them through the
//! client's payload fetcher, keeps the attributes the config lists as claims
//! and hands the result to the first [`Tokenizer`] that supports the config.
//! The session is never exposed to the client, only the minted token.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Map, Value};
use tracing::debug;
use zeroize::Zeroizing;

use crate::{
    config::{FeatureConfig, JwtConfig},
    error::{BrokerError, Result},
    feature_store::FeatureConfigStore,
    registry::ClientRegistry,
    session::{Attributes, SessionStore},
    types::{ClientId, ClientSecret, Realm, Ticket},
};

/// Mints tokens from a subject, a claim payload and a token config.
#[async_trait]
pub trait Tokenizer: Send + Sync {
    /// Returns `true` if this tokenizer can mint tokens for `config`.
    fn supports(&self, config: &FeatureConfig) -> bool;

    /// Mints a token for `subject` carrying `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::External`] if minting fails.
    async fn tokenize(&self, subject: &str, payload: &Attributes, config: &FeatureConfig) -> Result<String>;
}

/// Fetches extra attributes from an upstream service.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns `true` if this fetcher can use `config`.
    fn supports(&self, config: &FeatureConfig) -> bool;

    /// Fetches attributes for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::External`] if the upstream call fails.
    async fn fetch(&self, request: &Attributes, config: &FeatureConfig) -> Result<Attributes>;
}

/// EdDSA JWT tokenizer for [`JwtConfig`]s.
#[derive(Debug, Clone)]
pub struct JwtTokenizer {
    issuer: String,
}

impl JwtTokenizer {
    /// Creates a tokenizer that stamps `issuer` into every token.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self { issuer: issuer.into() }
    }

    fn encoding_key(config: &JwtConfig) -> Result<EncodingKey> {
        let seed = Zeroizing::new(
            URL_SAFE_NO_PAD
                .decode(&config.signing_key)
                .map_err(|_| BrokerError::domain("jwt signing key is not base64url"))?,
        );
        if seed.len() != 32 {
            return Err(BrokerError::domain("jwt signing key must be 32 bytes"));
        }
        let mut pkcs8_der = Zeroizing::new(vec![
            0x30, 0x2e, // SEQUENCE, 46 bytes
            0x02, 0x01, 0x00, // INTEGER version 0
            0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
            0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
            0x04, 0x22, // OCTET STRING, 34 bytes
            0x04, 0x20, // OCTET STRING, 32 bytes (the seed)
        ]);
        pkcs8_der.extend_from_slice(&seed);
        Ok(EncodingKey::from_ed_der(&pkcs8_der))
    }
}

#[async_trait]
impl Tokenizer for JwtTokenizer {
    fn supports(&self, config: &FeatureConfig) -> bool {
        matches!(config, FeatureConfig::Jwt(_))
    }

    async fn tokenize(&self, subject: &str, payload: &Attributes, config: &FeatureConfig) -> Result<String> {
        let FeatureConfig::Jwt(config) = config else {
            return Err(BrokerError::Type(format!("'{}' config cannot mint JWTs", config.type_name())));
        };

        let now = Utc::now().timestamp();
        let ttl = i64::try_from(config.ttl).unwrap_or(i64::MAX);
        let mut claims: Map<String, Value> = payload.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        claims.insert("iss".into(), Value::from(self.issuer.as_str()));
        claims.insert("sub".into(), Value::from(subject));
        claims.insert("iat".into(), Value::from(now));
        claims.insert("exp".into(), Value::from(now.saturating_add(ttl)));

        let key = Self::encoding_key(config)?;
        jsonwebtoken::encode(&Header::new(Algorithm::EdDSA), &claims, &key)
            .map_err(|e| BrokerError::External(format!("jwt encoding failed: {e}")))
    }
}

/// Issues access tokens for authenticated sessions.
#[derive(Clone)]
pub struct TokenIssuer {
    registry: ClientRegistry,
    sessions: SessionStore,
    token_store: FeatureConfigStore,
    payload_store: Option<FeatureConfigStore>,
    tokenizers: Vec<Arc<dyn Tokenizer>>,
    fetchers: Vec<Arc<dyn Fetcher>>,
}

#[bon::bon]
impl TokenIssuer {
    /// Creates an issuer.
    ///
    /// # Arguments
    ///
    /// * `token_store` - Store holding the clients' tokenizer configs
    /// * `payload_store` - Store holding optional fetcher configs
    #[builder]
    pub fn new(
        registry: ClientRegistry,
        sessions: SessionStore,
        token_store: FeatureConfigStore,
        payload_store: Option<FeatureConfigStore>,
        #[builder(default)] tokenizers: Vec<Arc<dyn Tokenizer>>,
        #[builder(default)] fetchers: Vec<Arc<dyn Fetcher>>,
    ) -> Self {
        Self { registry, sessions, token_store, payload_store, tokenizers, fetchers }
    }

    /// Mints a token for the session under `ticket` on behalf of `client`.
    ///
    /// `request` is relayed to the client's payload fetcher, if it has one.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::NotFound`] if `client` is not registered
    /// - [`BrokerError::SessionNotFound`] if no session exists for `ticket`
    /// - [`BrokerError::FeatureNotConfigured`] if the client has no token config
    /// - [`BrokerError::Decryption`] if `secret` does not open the client's configs
    /// - [`BrokerError::External`] if the fetcher or tokenizer fails
    #[tracing::instrument(skip(self, ticket, secret, request), fields(realm = %realm, client = %client))]
    pub async fn issue(
        &self,
        realm: &Realm,
        ticket: &Ticket,
        client: &ClientId,
        secret: &ClientSecret,
        request: &Attributes,
    ) -> Result<String> {
        if !self.registry.exists(client, true).await? {
            return Err(BrokerError::NotFound(format!("client {client}")));
        }
        let session = self.sessions.find(realm, ticket).await?.ok_or(BrokerError::SessionNotFound)?;
        let token_config = self
            .token_store
            .find(client, secret)
            .await?
            .ok_or_else(|| BrokerError::FeatureNotConfigured(self.token_store.namespace().to_owned()))?;

        let mut attributes = session.attributes;
        if let Some(fetched) = self.fetch(client, secret, &session.identifier, request).await? {
            attributes.extend(fetched);
        }

        let claims = token_config.claims().unwrap_or_default();
        let payload: Attributes = attributes.into_iter().filter(|(name, _)| claims.contains(name)).collect();
        debug!(claims = payload.len(), "Minting token");

        let tokenizer = self.tokenizers.iter().find(|t| t.supports(&token_config)).ok_or_else(|| {
            BrokerError::internal(format!("no tokenizer supports '{}' configs", token_config.type_name()))
        })?;
        tokenizer.tokenize(&session.identifier, &payload, &token_config).await
    }

    async fn fetch(
        &self,
        client: &ClientId,
        secret: &ClientSecret,
        subject: &str,
        request: &Attributes,
    ) -> Result<Option<Attributes>> {
        let Some(store) = &self.payload_store else {
            return Ok(None);
        };
        let Some(config) = store.find(client, secret).await? else {
            return Ok(None);
        };
        let fetcher = self.fetchers.iter().find(|f| f.supports(&config)).ok_or_else(|| {
            BrokerError::internal(format!("no fetcher supports '{}' configs", config.type_name()))
        })?;

        let mut relayed = request.clone();
        relayed.insert("subject".into(), Value::from(subject));
        fetcher.fetch(&relayed, &config).await.map(Some)
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("token_store", &self.token_store)
            .field("payload_store", &self.payload_store)
            .field("tokenizers", &self.tokenizers.len())
            .field("fetchers", &self.fetchers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use jsonwebtoken::{DecodingKey, Validation};
    use parking_lot::Mutex;
    use serde_json::json;
    use tessera_storage::{CachePool, MemoryCachePool};

    use super::*;
    use crate::testutil::{TestBroker, cipher, rsa_public_key_pem};

    /// Fetcher returning fixed attributes and recording what it was sent.
    #[derive(Default)]
    struct StaticFetcher {
        seen: Mutex<Vec<Attributes>>,
    }

    #[async_trait]
    impl Fetcher for StaticFetcher {
        fn supports(&self, config: &FeatureConfig) -> bool {
            matches!(config, FeatureConfig::Fetch(_))
        }

        async fn fetch(&self, request: &Attributes, _config: &FeatureConfig) -> Result<Attributes> {
            self.seen.lock().push(request.clone());
            Ok(Attributes::from([("department".to_owned(), json!("R&D"))]))
        }
    }

    struct Fixture {
        broker: TestBroker,
        issuer: TokenIssuer,
        fetcher: Arc<StaticFetcher>,
        realm: Realm,
    }

    fn fixture() -> Fixture {
        let broker = TestBroker::new();
        let realm = Realm::from("main");
        let pool: Arc<dyn CachePool> = Arc::new(MemoryCachePool::new(Some(Duration::from_secs(600))));
        let sessions = SessionStore::new(Arc::new(cipher()), [(realm.clone(), pool)]);
        let fetcher = Arc::new(StaticFetcher::default());
        let issuer = TokenIssuer::builder()
            .registry(broker.registry.clone())
            .sessions(sessions)
            .token_store(broker.store("token").clone())
            .payload_store(broker.store("payload").clone())
            .tokenizers(vec![Arc::new(JwtTokenizer::new("https://sso.example")) as Arc<dyn Tokenizer>])
            .fetchers(vec![fetcher.clone() as Arc<dyn Fetcher>])
            .build();
        Fixture { broker, issuer, fetcher, realm }
    }

    fn decode(token: &str, public_key: &str) -> Map<String, Value> {
        let key = DecodingKey::from_ed_components(public_key).unwrap();
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.validate_aud = false;
        jsonwebtoken::decode::<Map<String, Value>>(token, &key, &validation).unwrap().claims
    }

    #[tokio::test]
    async fn test_issue_filters_claims_and_relays_payload() {
        let fx = fixture();
        let input = json!({
            "signature": {"key": rsa_public_key_pem()},
            "token": {"#": "jwt", "claims": ["email", "department"], "ttl": 120},
            "payload": {"#": "fetch", "url": "https://upstream.example/attrs"},
        });
        let result = fx.broker.orchestrator.register(input.as_object().unwrap()).await.unwrap();
        let secret = ClientSecret::decode(&result.secret).unwrap();
        let public_key = result.public_output["token"]["public_key"].as_str().unwrap().to_owned();

        let attrs = Attributes::from([
            ("email".to_owned(), json!("a@example.com")),
            ("password_hash".to_owned(), json!("never leaves")),
        ]);
        let ticket = fx.issuer.sessions.persist(&fx.realm, "user-7", &attrs, None).await.unwrap();
        let request = Attributes::from([("scope".to_owned(), json!("profile"))]);

        let token = fx.issuer.issue(&fx.realm, &ticket, &result.client_id, &secret, &request).await.unwrap();
        let claims = decode(&token, &public_key);

        assert_eq!(claims["sub"], "user-7");
        assert_eq!(claims["iss"], "https://sso.example");
        assert_eq!(claims["email"], "a@example.com");
        assert_eq!(claims["department"], "R&D");
        assert!(claims.get("password_hash").is_none());
        assert_eq!(claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(), 120);

        let seen = fx.fetcher.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["subject"], "user-7");
        assert_eq!(seen[0]["scope"], "profile");
    }

    #[tokio::test]
    async fn test_issue_failures() {
        let fx = fixture();
        let input = json!({"signature": {"key": rsa_public_key_pem()}, "token": {"#": "jwt"}});
        let result = fx.broker.orchestrator.register(input.as_object().unwrap()).await.unwrap();
        let secret = ClientSecret::decode(&result.secret).unwrap();
        let ticket = fx.issuer.sessions.persist(&fx.realm, "user-7", &Attributes::new(), None).await.unwrap();
        let request = Attributes::new();

        let unknown_session = fx.issuer.issue(&fx.realm, &Ticket::generate(), &result.client_id, &secret, &request).await;
        assert!(matches!(unknown_session, Err(BrokerError::SessionNotFound)));

        let wrong_secret =
            fx.issuer.issue(&fx.realm, &ticket, &result.client_id, &ClientSecret::generate(), &request).await;
        assert!(matches!(wrong_secret, Err(BrokerError::Decryption)));

        let unknown_client = fx.issuer.issue(&fx.realm, &ticket, &ClientId::generate(), &secret, &request).await;
        assert!(matches!(unknown_client, Err(BrokerError::NotFound(_))));

        // No payload config: the fetcher is never called.
        fx.issuer.issue(&fx.realm, &ticket, &result.client_id, &secret, &request).await.unwrap();
        assert!(fx.fetcher.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_jwt_tokenizer_rejects_foreign_config() {
        let tokenizer = JwtTokenizer::new("iss");
        let config = FeatureConfig::Jwe(crate::config::JweConfig {
            recipient_key: String::new(),
            claims: vec![],
            ttl: 1,
        });
        assert!(!tokenizer.supports(&config));
        assert!(matches!(tokenizer.tokenize("s", &Attributes::new(), &config).await, Err(BrokerError::Type(_))));
    }
}
