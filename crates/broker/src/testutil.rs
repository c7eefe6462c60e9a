//! Shared test utilities for broker testing.
//!
//! Provides a fixed-key cipher, a process-wide RSA key pair for signature
//! configs, and [`TestBroker`], the stock store layout over an arbitrary
//! backend. Feature-gated behind `testutil`.
//!
//! ```toml
//! [dev-dependencies]
//! tessera-broker = { path = "../broker", features = ["testutil"] }
//! ```

use std::sync::{Arc, OnceLock};

use rsa::{
    RsaPrivateKey, RsaPublicKey,
    pkcs8::{EncodePublicKey, LineEnding},
};
use tessera_storage::{MemoryBackend, StorageBackend};
use zeroize::Zeroizing;

use crate::{
    crypto::{KeyedCipher, SERVER_KEY_LEN},
    factory::default_factories,
    feature_store::FeatureConfigStore,
    maintenance::ClientMaintenance,
    registration::RegistrationOrchestrator,
    registry::{ClientRegistry, DEFAULT_REGISTRY_NAMESPACE},
    settings::{DEFAULT_INACTIVITY, default_features},
};

/// RSA modulus size of the test key. Small to keep generation fast.
const TEST_RSA_BITS: usize = 1024;

/// A cipher with one fixed server key.
///
/// # Panics
///
/// Never in practice: the key list is non-empty.
pub fn cipher() -> KeyedCipher {
    KeyedCipher::new(vec![Zeroizing::new([0x42; SERVER_KEY_LEN])]).expect("one server key is configured")
}

/// Process-wide RSA private key, generated on first use.
///
/// # Panics
///
/// Panics if key generation fails.
pub fn rsa_private_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| {
        RsaPrivateKey::new(&mut rand::thread_rng(), TEST_RSA_BITS).expect("failed to generate RSA test key")
    })
}

/// SPKI PEM of [`rsa_private_key`]'s public half.
///
/// # Panics
///
/// Panics if PEM encoding fails.
pub fn rsa_public_key_pem() -> String {
    RsaPublicKey::from(rsa_private_key())
        .to_public_key_pem(LineEnding::LF)
        .expect("failed to encode RSA test public key")
}

/// Registry, stock stores and orchestrator over one backend.
pub struct TestBroker {
    /// The shared backend.
    pub backend: Arc<dyn StorageBackend>,
    /// The client registry.
    pub registry: ClientRegistry,
    /// Stores in [`default_features`] order.
    pub stores: Vec<FeatureConfigStore>,
    /// Orchestrator over `registry` and `stores` with the stock factories.
    pub orchestrator: RegistrationOrchestrator,
}

impl TestBroker {
    /// A broker over a fresh [`MemoryBackend`].
    pub fn new() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    /// A broker over `backend`.
    pub fn with_backend(backend: Arc<dyn StorageBackend>) -> Self {
        let cipher = Arc::new(cipher());
        let registry = ClientRegistry::new(Arc::clone(&backend), DEFAULT_REGISTRY_NAMESPACE);
        let stores: Vec<FeatureConfigStore> = default_features()
            .into_iter()
            .map(|declaration| {
                FeatureConfigStore::builder()
                    .backend(Arc::clone(&backend))
                    .namespace(declaration.key)
                    .interface(declaration.interface)
                    .cipher(Arc::clone(&cipher))
                    .required(declaration.required)
                    .build()
            })
            .collect();
        let orchestrator = RegistrationOrchestrator::new(registry.clone(), stores.clone(), default_factories());
        Self { backend, registry, stores, orchestrator }
    }

    /// The store named `key`.
    ///
    /// # Panics
    ///
    /// Panics if no such store is declared.
    pub fn store(&self, key: &str) -> &FeatureConfigStore {
        self.stores
            .iter()
            .find(|store| store.namespace() == key)
            .unwrap_or_else(|| panic!("no store named '{key}'"))
    }

    /// Maintenance over this broker with the default inactivity period.
    pub fn maintenance(&self, max_clients: Option<u64>) -> ClientMaintenance {
        ClientMaintenance::new(self.registry.clone(), self.stores.clone(), DEFAULT_INACTIVITY, max_clients)
    }
}

impl Default for TestBroker {
    fn default() -> Self {
        Self::new()
    }
}
