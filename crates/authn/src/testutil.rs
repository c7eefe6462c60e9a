//! Shared test utilities for trust engine testing.
//!
//! Registers clients whose signature configs hold the public half of the
//! broker test RSA key, and signs requests with the private half. Feature-gated
//! behind `testutil`.
//!
//! ```toml
//! [dev-dependencies]
//! tessera-authn = { path = "../authn", features = ["testutil"] }
//! ```

use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{TimeZone, Utc};
use rsa::Pkcs1v15Sign;
use serde_json::json;
use sha2::{Digest, Sha256, Sha384, Sha512};
use tessera_broker::{
    ClientId, ClientSecret, DigestAlgorithm,
    testutil::{TestBroker, rsa_private_key, rsa_public_key_pem},
};

use crate::{
    request::TrustRequest,
    settings::{DEFAULT_SIGNATURE_PARAM, DEFAULT_TIMESTAMP_PARAM},
    signature::canonicalize,
};

/// Registers a client signing with `digest`, returning its id and secret.
///
/// # Panics
///
/// Panics if registration fails.
pub async fn register_signing_client(
    broker: &TestBroker,
    digest: DigestAlgorithm,
    ttl: u64,
    skew: i64,
) -> (ClientId, ClientSecret) {
    let input = json!({
        "signature": {"md-alg": digest.name(), "key": rsa_public_key_pem(), "ttl": ttl, "skew": skew},
        "token": {"#": "jwt"},
    });
    let object = input.as_object().expect("registration input is an object");
    let result = broker.orchestrator.register(object).await.expect("failed to register test client");
    let secret = ClientSecret::decode(&result.secret).expect("registration returns a decodable secret");
    (result.client_id, secret)
}

/// Signs the canonical form of `query` with the test key, base64url-encoded.
///
/// # Panics
///
/// Panics if signing fails.
pub fn sign_query(query: &BTreeMap<String, String>, digest: DigestAlgorithm) -> String {
    let message = canonicalize(query, DEFAULT_SIGNATURE_PARAM, &[]);
    let (scheme, hashed) = match digest {
        DigestAlgorithm::Sha256 => (Pkcs1v15Sign::new::<Sha256>(), Sha256::digest(message.as_bytes()).to_vec()),
        DigestAlgorithm::Sha384 => (Pkcs1v15Sign::new::<Sha384>(), Sha384::digest(message.as_bytes()).to_vec()),
        DigestAlgorithm::Sha512 => (Pkcs1v15Sign::new::<Sha512>(), Sha512::digest(message.as_bytes()).to_vec()),
    };
    let signature = rsa_private_key().sign(scheme, &hashed).expect("failed to sign test request");
    URL_SAFE_NO_PAD.encode(signature)
}

/// Builds a request from `client` declaring `declared`, carrying `params`
/// signed with `digest`, judged at `server_time` (UNIX seconds).
///
/// # Panics
///
/// Panics if signing fails or `server_time` is out of range.
pub fn signed_request(
    client: &ClientId,
    secret: &ClientSecret,
    declared: i64,
    params: &[(&str, &str)],
    digest: DigestAlgorithm,
    server_time: i64,
) -> TrustRequest {
    let mut query: BTreeMap<String, String> =
        params.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
    query.insert(DEFAULT_TIMESTAMP_PARAM.to_owned(), declared.to_string());
    let signature = sign_query(&query, digest);
    query.insert(DEFAULT_SIGNATURE_PARAM.to_owned(), signature);

    TrustRequest::builder()
        .client_id(*client)
        .secret(secret.clone())
        .query(query)
        .server_time(Utc.timestamp_opt(server_time, 0).single().expect("server time in range"))
        .build()
}
