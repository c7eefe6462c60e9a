//! Encrypted per-feature config storage.
//!
//! Each [`FeatureConfigStore`] holds one hash map `client id -> ciphertext`
//! for one feature. Values are sealed under the client secret, which the
//! broker never stores: only a request that presents the secret can read the
//! client's configs back.

use std::sync::Arc;

use tessera_storage::StorageBackend;
use tracing::debug;

use crate::{
    config::{ConfigInterface, FeatureConfig},
    crypto::KeyedCipher,
    error::Result,
    marshal::{ConfigMarshaller, ConfigSubject},
    types::{ClientId, ClientSecret},
};

/// Encrypted hash map of one feature's client configs.
#[derive(Clone)]
pub struct FeatureConfigStore {
    backend: Arc<dyn StorageBackend>,
    namespace: String,
    marshaller: ConfigMarshaller,
    cipher: Arc<KeyedCipher>,
    required: bool,
}

#[bon::bon]
impl FeatureConfigStore {
    /// Creates a store.
    ///
    /// # Arguments
    ///
    /// * `backend` - Shared backing store
    /// * `namespace` - Hash map name, usually the feature key
    /// * `interface` - Interface every stored config must implement
    /// * `cipher` - Codec sealing values under the client secret
    /// * `required` - Whether every registration must supply a config for this store
    #[builder]
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        #[builder(into)] namespace: String,
        interface: ConfigInterface,
        cipher: Arc<KeyedCipher>,
        #[builder(default)] required: bool,
    ) -> Self {
        Self { backend, namespace, marshaller: ConfigMarshaller::new(interface), cipher, required }
    }

    /// Hash map name.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Interface stored configs implement.
    #[must_use]
    pub fn interface(&self) -> ConfigInterface {
        self.marshaller.interface()
    }

    /// Returns `true` if the store accepts `subject`.
    pub fn supports<'a>(&self, subject: impl Into<ConfigSubject<'a>>) -> bool {
        self.marshaller.supports(subject)
    }

    /// Returns `true` if every registration must supply a config for this store.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Returns `true` if a config is stored for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Storage`](crate::BrokerError::Storage) if the backend fails.
    pub async fn exists(&self, id: &ClientId) -> Result<bool> {
        Ok(self.backend.exists(&self.namespace, &id.raw()).await?)
    }

    /// Stores `config` for `id`, sealed under `secret`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Type`](crate::BrokerError::Type) if the store
    /// does not accept `config`, or a storage error.
    #[tracing::instrument(skip(self, config, secret), fields(namespace = %self.namespace, kind = config.type_name()))]
    pub async fn persist(&self, id: &ClientId, config: &FeatureConfig, secret: &ClientSecret) -> Result<()> {
        let plaintext = self.marshaller.marshall(config)?;
        let sealed = self.cipher.encrypt(&plaintext, secret.as_bytes())?;
        self.backend.set(&self.namespace, &id.raw(), sealed).await?;
        Ok(())
    }

    /// Loads and decrypts the config of `id`.
    ///
    /// Returns `None` if nothing is stored for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Decryption`](crate::BrokerError::Decryption)
    /// for a wrong secret and [`BrokerError::Domain`](crate::BrokerError::Domain)
    /// for a corrupt or foreign value. Both mean access denied.
    #[tracing::instrument(skip(self, secret), fields(namespace = %self.namespace))]
    pub async fn find(&self, id: &ClientId, secret: &ClientSecret) -> Result<Option<FeatureConfig>> {
        let Some(sealed) = self.backend.get(&self.namespace, &id.raw()).await? else {
            debug!("No config stored");
            return Ok(None);
        };
        let plaintext = self.cipher.decrypt(&sealed, secret.as_bytes())?;
        self.marshaller.unmarshall(&plaintext).map(Some)
    }

    /// Removes the configs of `ids`, returning how many existed.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Storage`](crate::BrokerError::Storage) if the backend fails.
    pub async fn remove(&self, ids: &[ClientId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let fields: Vec<String> = ids.iter().map(ClientId::raw).collect();
        let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
        Ok(self.backend.delete(&self.namespace, &fields).await?)
    }
}

impl std::fmt::Debug for FeatureConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureConfigStore")
            .field("namespace", &self.namespace)
            .field("interface", &self.interface())
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}
