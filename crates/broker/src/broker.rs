//! Assembly of the broker components from a [`BrokerConfig`].

use std::{sync::Arc, time::Duration};

use tessera_storage::{CachePool, MemoryBackend, MemoryCachePool, StorageBackend};

use crate::{
    config::ConfigInterface,
    crypto::KeyedCipher,
    error::Result,
    factory::{FeatureConfigFactory, default_factories},
    feature_store::FeatureConfigStore,
    issuance::{Fetcher, TokenIssuer, Tokenizer},
    maintenance::ClientMaintenance,
    registration::RegistrationOrchestrator,
    registry::ClientRegistry,
    session::SessionStore,
    settings::BrokerConfig,
};

/// Every broker component, sharing one backend and one cipher.
#[derive(Debug, Clone)]
pub struct Broker {
    /// Client registry.
    pub registry: ClientRegistry,
    /// Feature config stores, in declaration order.
    pub stores: Vec<FeatureConfigStore>,
    /// Registration entry point.
    pub registration: RegistrationOrchestrator,
    /// Session store over every configured realm.
    pub sessions: SessionStore,
    /// Client lifecycle maintenance.
    pub maintenance: ClientMaintenance,
}

impl Broker {
    /// Builds the components over `backend`, creating one session pool per
    /// realm with `pool_for`, which receives the realm's lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Config`](crate::BrokerError::Config) if
    /// `config` does not validate.
    pub fn new(
        config: &BrokerConfig,
        backend: Arc<dyn StorageBackend>,
        pool_for: impl Fn(Option<Duration>) -> Arc<dyn CachePool>,
        factories: Vec<Arc<dyn FeatureConfigFactory>>,
    ) -> Result<Self> {
        config.validate()?;
        let cipher = Arc::new(KeyedCipher::new(config.encryption().server_keys()?)?);

        let registry = ClientRegistry::new(Arc::clone(&backend), config.registration().namespace.clone());
        let stores: Vec<FeatureConfigStore> = config
            .features()
            .iter()
            .map(|feature| {
                FeatureConfigStore::builder()
                    .backend(Arc::clone(&backend))
                    .namespace(feature.key.clone())
                    .interface(feature.interface)
                    .cipher(Arc::clone(&cipher))
                    .required(feature.required)
                    .build()
            })
            .collect();

        let registration = RegistrationOrchestrator::new(registry.clone(), stores.clone(), factories);
        let sessions = SessionStore::new(
            Arc::clone(&cipher),
            config.sessions().realms.iter().map(|(realm, settings)| (realm.clone(), pool_for(settings.lifetime))),
        );
        let maintenance = ClientMaintenance::new(
            registry.clone(),
            stores.clone(),
            config.registration().inactivity,
            config.registration().max_clients,
        );

        Ok(Self { registry, stores, registration, sessions, maintenance })
    }

    /// Builds the components over in-memory storage with the stock factories.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Config`](crate::BrokerError::Config) if
    /// `config` does not validate.
    pub fn in_memory(config: &BrokerConfig) -> Result<Self> {
        Self::new(
            config,
            Arc::new(MemoryBackend::new()),
            |lifetime| -> Arc<dyn CachePool> { Arc::new(MemoryCachePool::new(lifetime)) },
            default_factories(),
        )
    }

    /// The store with namespace `key`, if declared.
    #[must_use]
    pub fn store(&self, key: &str) -> Option<&FeatureConfigStore> {
        self.stores.iter().find(|store| store.namespace() == key)
    }

    /// Assembles a [`TokenIssuer`] over the first tokenizer store and the
    /// first fetcher store, or `None` if no tokenizer store is declared.
    #[must_use]
    pub fn token_issuer(
        &self,
        tokenizers: Vec<Arc<dyn Tokenizer>>,
        fetchers: Vec<Arc<dyn Fetcher>>,
    ) -> Option<TokenIssuer> {
        let by_interface =
            |interface: ConfigInterface| self.stores.iter().find(|store| store.interface() == interface).cloned();
        let token_store = by_interface(ConfigInterface::Tokenizer)?;
        Some(
            TokenIssuer::builder()
                .registry(self.registry.clone())
                .sessions(self.sessions.clone())
                .token_store(token_store)
                .maybe_payload_store(by_interface(ConfigInterface::Fetcher))
                .tokenizers(tokenizers)
                .fetchers(fetchers)
                .build(),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use serde_json::json;

    use super::*;
    use crate::{
        testutil::rsa_public_key_pem,
        types::{ClientSecret, Realm},
    };

    #[tokio::test]
    async fn test_in_memory_broker_end_to_end() {
        let config = BrokerConfig::builder().keys([URL_SAFE_NO_PAD.encode([4u8; 32])]).build().unwrap();
        let broker = Broker::in_memory(&config).unwrap();
        assert_eq!(broker.stores.len(), 4);
        assert!(broker.store("signature").unwrap().is_required());
        assert!(!broker.store("payload").unwrap().is_required());

        let input = json!({"signature": {"key": rsa_public_key_pem()}, "token": {"#": "jwt"}});
        let result = broker.registration.register(input.as_object().unwrap()).await.unwrap();
        let secret = ClientSecret::decode(&result.secret).unwrap();
        assert!(broker.store("token").unwrap().find(&result.client_id, &secret).await.unwrap().is_some());

        let realm = Realm::from("main");
        let ticket = broker.sessions.persist(&realm, "user-1", &Default::default(), None).await.unwrap();
        assert!(broker.sessions.exists(&realm, &ticket).await.unwrap());

        let issuer = broker
            .token_issuer(vec![Arc::new(crate::issuance::JwtTokenizer::new("tessera")) as Arc<dyn Tokenizer>], vec![])
            .unwrap();
        let token = issuer
            .issue(&realm, &ticket, &result.client_id, &secret, &Default::default())
            .await
            .unwrap();
        assert_eq!(token.split('.').count(), 3);
    }
}
