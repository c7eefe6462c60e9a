//! Signed-request predicate.
//!
//! A client signs every request it sends on behalf of a user. The signature
//! covers the request's query parameters and a declared timestamp, and is
//! verified against the RSA public key stored in the client's encrypted
//! signature config. The client's secret is needed to open that config, so a
//! request that verifies proves possession of both the private key and the
//! secret.
//!
//! # Canonical form
//!
//! Every query parameter except the signature parameter and the configured
//! exclusions, sorted by name, values joined with `.`:
//!
//! ```text
//! ?b=2&_timestamp=1700000000&a=1&_signature=...   →   "1700000000.1.2"
//! ```

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use fail::fail_point;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256, Sha384, Sha512};
use tessera_broker::{
    ClientId, ClientSecret, DigestAlgorithm, FeatureConfig, FeatureConfigStore, SignatureConfig,
    factory::parse_rsa_public_key,
};
use tracing::{debug, warn};

use crate::{
    error::{AuthError, Result},
    replay::ReplayDetector,
    request::TrustRequest,
    settings::SignatureSettings,
    vote::Vote,
};

/// Returns `true` if a request declared at `declared` (UNIX seconds) is fresh
/// at `server_time`.
///
/// The client clock is `declared + skew`. It must not be ahead of the server
/// and must not lag it by more than `ttl`. Both bounds are inclusive.
#[must_use]
pub fn is_fresh(declared: i64, skew: i64, ttl: u64, server_time: i64) -> bool {
    let client_time = declared.saturating_add(skew);
    let ttl = i64::try_from(ttl).unwrap_or(i64::MAX);
    client_time <= server_time && server_time.saturating_sub(ttl) <= client_time
}

/// Builds the signed string from `query`.
#[must_use]
pub fn canonicalize(query: &BTreeMap<String, String>, signature_param: &str, exclude: &[String]) -> String {
    query
        .iter()
        .filter(|(name, _)| name.as_str() != signature_param && !exclude.contains(name))
        .map(|(_, value)| value.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

/// Verifies an RSA PKCS#1 v1.5 `signature` over `message`.
///
/// # Errors
///
/// Returns [`AuthError::AccessDenied`] if the signature does not verify.
pub fn verify_signature(
    digest: DigestAlgorithm,
    key: &RsaPublicKey,
    message: &[u8],
    signature: &[u8],
) -> Result<()> {
    let (scheme, hashed) = match digest {
        DigestAlgorithm::Sha256 => (Pkcs1v15Sign::new::<Sha256>(), Sha256::digest(message).to_vec()),
        DigestAlgorithm::Sha384 => (Pkcs1v15Sign::new::<Sha384>(), Sha384::digest(message).to_vec()),
        DigestAlgorithm::Sha512 => (Pkcs1v15Sign::new::<Sha512>(), Sha512::digest(message).to_vec()),
    };
    key.verify(scheme, &hashed, signature).map_err(|_| AuthError::AccessDenied)
}

/// Votes on whether a request carries a valid, fresh client signature.
#[derive(Clone)]
pub struct SignaturePredicate {
    store: FeatureConfigStore,
    settings: SignatureSettings,
    allowed_digests: Vec<DigestAlgorithm>,
    replay: Option<Arc<dyn ReplayDetector>>,
}

#[bon::bon]
impl SignaturePredicate {
    /// Creates the predicate.
    ///
    /// # Arguments
    ///
    /// * `store` - Store holding the clients' signature configs.
    /// * `settings` - Parameter names and exclusions.
    /// * `allowed_digests` - Digests accepted from clients (default: every SHA-2 digest).
    /// * `replay` - Optional replay detector.
    #[builder]
    pub fn new(
        store: FeatureConfigStore,
        #[builder(default)] settings: SignatureSettings,
        #[builder(default = vec![DigestAlgorithm::Sha256, DigestAlgorithm::Sha384, DigestAlgorithm::Sha512])]
        allowed_digests: Vec<DigestAlgorithm>,
        replay: Option<Arc<dyn ReplayDetector>>,
    ) -> Self {
        Self { store, settings, allowed_digests, replay }
    }

    /// Evaluates the predicate.
    ///
    /// Abstains unless the request declares a client id and secret and
    /// carries both the timestamp and the signature parameter. Every failure
    /// past that point, including verifier faults, is a denial.
    #[tracing::instrument(skip(self, request), fields(client = ?request.client_id()))]
    pub async fn evaluate(&self, request: &TrustRequest) -> Vote {
        let (Some(client), Some(secret), Some(timestamp), Some(signature)) = (
            request.client_id(),
            request.secret(),
            request.query_param(&self.settings.timestamp_param),
            request.query_param(&self.settings.signature_param),
        ) else {
            debug!("Signature prerequisites missing, abstaining");
            return Vote::Abstain;
        };

        match self.check(request, client, secret, timestamp, signature).await {
            Ok(()) => Vote::Grant,
            Err(AuthError::AccessDenied) => Vote::Deny,
            Err(e) => {
                warn!(error = %e, "Signature verification failed");
                Vote::Deny
            },
        }
    }

    async fn check(
        &self,
        request: &TrustRequest,
        client: &ClientId,
        secret: &ClientSecret,
        timestamp: &str,
        signature: &str,
    ) -> Result<()> {
        let declared: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| AuthError::MalformedRequest(format!("timestamp '{timestamp}' is not an integer")))?;

        let config = self.load_config(client, secret).await?;
        if !self.allowed_digests.contains(&config.digest) {
            return Err(AuthError::UnsupportedDigest(config.digest.name().to_owned()));
        }

        let server_time = request.server_time().timestamp();
        if !is_fresh(declared, config.skew, config.ttl, server_time) {
            debug!(declared, server_time, ttl = config.ttl, skew = config.skew, "Stale request signature");
            return Err(AuthError::AccessDenied);
        }

        let raw_signature = URL_SAFE_NO_PAD
            .decode(signature.trim_end_matches('='))
            .map_err(|_| AuthError::MalformedRequest("signature is not base64url".into()))?;
        let key = parse_rsa_public_key(&config.public_key_pem)
            .ok_or_else(|| AuthError::InvalidPublicKey(format!("stored key of client {client} does not parse")))?;
        let message = canonicalize(request.query(), &self.settings.signature_param, &self.settings.exclude);

        fail_point!("signature-before-verify", |_| {
            Err(AuthError::InvalidPublicKey("injected verifier failure".into()))
        });

        verify_signature(config.digest, &key, message.as_bytes(), &raw_signature)?;

        // Keyed on the decoded bytes: padding variants of one signature are the same replay.
        if let Some(replay) = &self.replay {
            let canonical = URL_SAFE_NO_PAD.encode(&raw_signature);
            replay.check_and_mark(&canonical, Duration::from_secs(config.ttl)).await?;
        }
        Ok(())
    }

    async fn load_config(&self, client: &ClientId, secret: &ClientSecret) -> Result<SignatureConfig> {
        match self.store.find(client, secret).await {
            Ok(Some(FeatureConfig::Signature(config))) => Ok(config),
            Ok(Some(other)) => Err(AuthError::MalformedRequest(format!(
                "client {client} stores a '{}' config as its signature config",
                other.type_name()
            ))),
            Ok(None) => {
                debug!("Client has no signature config");
                Err(AuthError::AccessDenied)
            },
            Err(e) if e.is_access_denied() => {
                debug!("Client secret does not open the signature config");
                Err(AuthError::AccessDenied)
            },
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for SignaturePredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignaturePredicate")
            .field("store", &self.store)
            .field("settings", &self.settings)
            .field("allowed_digests", &self.allowed_digests)
            .field("replay", &self.replay.is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tessera_broker::testutil::TestBroker;

    use super::*;
    use crate::{
        replay::InMemoryReplayDetector,
        testutil::{register_signing_client, signed_request},
    };

    const NOW: i64 = 1_700_000_000;

    fn query(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
    }

    fn predicate(broker: &TestBroker) -> SignaturePredicate {
        SignaturePredicate::builder().store(broker.store("signature").clone()).build()
    }

    #[test]
    fn test_canonicalize_sorts_and_excludes() {
        let q = query(&[("b", "2"), ("a", "1"), ("_signature", "sig"), ("utm", "x"), ("_timestamp", "9")]);
        assert_eq!(canonicalize(&q, "_signature", &["utm".to_owned()]), "9.1.2");
        assert_eq!(canonicalize(&q, "_signature", &[]), "9.1.2.x");
        assert_eq!(canonicalize(&BTreeMap::new(), "_signature", &[]), "");
    }

    #[test]
    fn test_freshness_boundaries() {
        // ttl 60, no skew
        assert!(is_fresh(NOW, 0, 60, NOW));
        assert!(is_fresh(NOW - 60, 0, 60, NOW));
        assert!(!is_fresh(NOW - 61, 0, 60, NOW));
        assert!(!is_fresh(NOW + 1, 0, 60, NOW));

        // a client running 30s fast is corrected by a -30 skew
        assert!(is_fresh(NOW + 30, -30, 60, NOW));
        assert!(!is_fresh(NOW + 31, -30, 60, NOW));
    }

    #[tokio::test]
    async fn test_valid_signature_granted() {
        let broker = TestBroker::new();
        let (client, secret) = register_signing_client(&broker, DigestAlgorithm::Sha256, 60, 0).await;
        let request = signed_request(&client, &secret, NOW - 10, &[("user", "alice")], DigestAlgorithm::Sha256, NOW);

        assert_eq!(predicate(&broker).evaluate(&request).await, Vote::Grant);
    }

    #[tokio::test]
    async fn test_every_digest_verifies() {
        let broker = TestBroker::new();
        for digest in [DigestAlgorithm::Sha256, DigestAlgorithm::Sha384, DigestAlgorithm::Sha512] {
            let (client, secret) = register_signing_client(&broker, digest, 60, 0).await;
            let request = signed_request(&client, &secret, NOW, &[], digest, NOW);
            assert_eq!(predicate(&broker).evaluate(&request).await, Vote::Grant, "{digest:?}");
        }
    }

    #[tokio::test]
    async fn test_missing_prerequisites_abstain() {
        let broker = TestBroker::new();
        let (client, secret) = register_signing_client(&broker, DigestAlgorithm::Sha256, 60, 0).await;
        let predicate = predicate(&broker);

        assert_eq!(predicate.evaluate(&TrustRequest::default()).await, Vote::Abstain);

        let no_secret = TrustRequest::builder()
            .client_id(client)
            .query([("_timestamp", NOW.to_string()), ("_signature", "abc".to_owned())])
            .build();
        assert_eq!(predicate.evaluate(&no_secret).await, Vote::Abstain);

        let no_signature =
            TrustRequest::builder().client_id(client).secret(secret).query([("_timestamp", NOW.to_string())]).build();
        assert_eq!(predicate.evaluate(&no_signature).await, Vote::Abstain);
    }

    #[tokio::test]
    async fn test_tampered_and_foreign_requests_denied() {
        let broker = TestBroker::new();
        let (client, secret) = register_signing_client(&broker, DigestAlgorithm::Sha256, 60, 0).await;
        let predicate = predicate(&broker);
        let at = Utc.timestamp_opt(NOW, 0).unwrap();

        // parameter changed after signing
        let signed = signed_request(&client, &secret, NOW, &[("user", "alice")], DigestAlgorithm::Sha256, NOW);
        let mut tampered = signed.query().clone();
        tampered.insert("user".into(), "mallory".into());
        let tampered = TrustRequest::builder()
            .client_id(client)
            .secret(secret.clone())
            .query(tampered)
            .server_time(at)
            .build();
        assert_eq!(predicate.evaluate(&tampered).await, Vote::Deny);

        // wrong secret cannot open the config
        let wrong_secret = signed_request(&client, &ClientSecret::generate(), NOW, &[], DigestAlgorithm::Sha256, NOW);
        assert_eq!(predicate.evaluate(&wrong_secret).await, Vote::Deny);

        // unknown client
        let unknown = signed_request(&ClientId::generate(), &secret, NOW, &[], DigestAlgorithm::Sha256, NOW);
        assert_eq!(predicate.evaluate(&unknown).await, Vote::Deny);

        // signed with a different digest than registered
        let digest_mismatch = signed_request(&client, &secret, NOW, &[], DigestAlgorithm::Sha512, NOW);
        assert_eq!(predicate.evaluate(&digest_mismatch).await, Vote::Deny);

        // garbage timestamp and signature
        let garbage = TrustRequest::builder()
            .client_id(client)
            .secret(secret)
            .query([("_timestamp", "yesterday"), ("_signature", "!!")])
            .build();
        assert_eq!(predicate.evaluate(&garbage).await, Vote::Deny);
    }

    #[tokio::test]
    async fn test_stale_and_future_requests_denied() {
        let broker = TestBroker::new();
        let (client, secret) = register_signing_client(&broker, DigestAlgorithm::Sha256, 60, 0).await;
        let predicate = predicate(&broker);

        for (declared, expected) in [(NOW - 60, Vote::Grant), (NOW - 61, Vote::Deny), (NOW + 1, Vote::Deny)] {
            let request = signed_request(&client, &secret, declared, &[], DigestAlgorithm::Sha256, NOW);
            assert_eq!(predicate.evaluate(&request).await, expected, "declared {declared}");
        }
    }

    #[tokio::test]
    async fn test_disallowed_digest_denied() {
        let broker = TestBroker::new();
        let (client, secret) = register_signing_client(&broker, DigestAlgorithm::Sha256, 60, 0).await;
        let predicate = SignaturePredicate::builder()
            .store(broker.store("signature").clone())
            .allowed_digests(vec![DigestAlgorithm::Sha512])
            .build();
        let request = signed_request(&client, &secret, NOW, &[], DigestAlgorithm::Sha256, NOW);

        assert_eq!(predicate.evaluate(&request).await, Vote::Deny);
    }

    #[tokio::test]
    async fn test_replayed_signature_denied() {
        let broker = TestBroker::new();
        let (client, secret) = register_signing_client(&broker, DigestAlgorithm::Sha256, 60, 0).await;
        let predicate = SignaturePredicate::builder()
            .store(broker.store("signature").clone())
            .replay(Arc::new(InMemoryReplayDetector::new(100)) as Arc<dyn ReplayDetector>)
            .build();
        let request = signed_request(&client, &secret, NOW, &[("n", "1")], DigestAlgorithm::Sha256, NOW);

        assert_eq!(predicate.evaluate(&request).await, Vote::Grant);
        assert_eq!(predicate.evaluate(&request).await, Vote::Deny);
    }

    #[tokio::test]
    async fn test_padded_replay_denied() {
        let broker = TestBroker::new();
        let (client, secret) = register_signing_client(&broker, DigestAlgorithm::Sha256, 60, 0).await;
        let predicate = SignaturePredicate::builder()
            .store(broker.store("signature").clone())
            .replay(Arc::new(InMemoryReplayDetector::new(100)) as Arc<dyn ReplayDetector>)
            .build();
        let request = signed_request(&client, &secret, NOW, &[("n", "1")], DigestAlgorithm::Sha256, NOW);
        assert_eq!(predicate.evaluate(&request).await, Vote::Grant);

        for padding in ["=", "=="] {
            let mut replayed = request.query().clone();
            let signature = replayed.get("_signature").cloned().unwrap();
            replayed.insert("_signature".to_owned(), format!("{signature}{padding}"));
            let replay = TrustRequest::builder()
                .client_id(client)
                .secret(secret.clone())
                .query(replayed)
                .server_time(Utc.timestamp_opt(NOW, 0).unwrap())
                .build();
            assert_eq!(predicate.evaluate(&replay).await, Vote::Deny, "padding {padding:?}");
        }
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn freshness_matches_window(
                declared in -1_000_000i64..1_000_000,
                skew in -1_000i64..1_000,
                ttl in 0u64..10_000,
                server in -1_000_000i64..1_000_000,
            ) {
                let client_time = declared + skew;
                let expected = server - ttl as i64 <= client_time && client_time <= server;
                prop_assert_eq!(is_fresh(declared, skew, ttl, server), expected);
            }

            #[test]
            fn freshness_inclusive_at_both_bounds(server in 0i64..1_000_000_000, ttl in 0u64..100_000) {
                let ttl_secs = ttl as i64;
                prop_assert!(is_fresh(server, 0, ttl, server));
                prop_assert!(is_fresh(server - ttl_secs, 0, ttl, server));
                prop_assert!(!is_fresh(server + 1, 0, ttl, server));
                prop_assert!(!is_fresh(server - ttl_secs - 1, 0, ttl, server));
            }
        }
    }
}
