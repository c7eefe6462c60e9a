#![cfg(feature = "failpoints")]
#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection in the authn crate.
//!
//! These tests require both `failpoints` and `testutil` features:
//! ```bash
//! cargo test -p tessera-authn --features failpoints,testutil --test failpoint_tests
//! ```

use tessera_authn::{
    SignaturePredicate, Vote,
    testutil::{register_signing_client, signed_request},
};
use tessera_broker::{DigestAlgorithm, testutil::TestBroker};

const NOW: i64 = 1_700_000_000;

#[tokio::test]
async fn verifier_failure_is_a_denial() {
    let scenario = fail::FailScenario::setup();
    let broker = TestBroker::new();
    let (client, secret) = register_signing_client(&broker, DigestAlgorithm::Sha256, 60, 0).await;
    let predicate = SignaturePredicate::builder().store(broker.store("signature").clone()).build();
    let request = signed_request(&client, &secret, NOW, &[], DigestAlgorithm::Sha256, NOW);

    // Enable fail point: the verifier errors instead of checking the signature
    fail::cfg("signature-before-verify", "return").expect("failed to configure fail point");

    assert_eq!(predicate.evaluate(&request).await, Vote::Deny);

    scenario.teardown();
}

#[tokio::test]
async fn verifier_without_failpoint_grants() {
    let scenario = fail::FailScenario::setup();
    let broker = TestBroker::new();
    let (client, secret) = register_signing_client(&broker, DigestAlgorithm::Sha256, 60, 0).await;
    let predicate = SignaturePredicate::builder().store(broker.store("signature").clone()).build();
    let request = signed_request(&client, &secret, NOW, &[], DigestAlgorithm::Sha256, NOW);

    assert_eq!(predicate.evaluate(&request).await, Vote::Grant);

    scenario.teardown();
}
