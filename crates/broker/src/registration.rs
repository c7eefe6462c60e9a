//! Atomic multi-feature client registration.
//!
//! [`RegistrationOrchestrator::register`] mints a client id and secret, builds
//! one config per requested feature, persists each config into every store
//! that accepts it and finally records the client in the registry. No lock
//! or cross-store transaction is taken: any failure removes the fresh id from
//! every store and the registry before the original error is returned. Ids
//! are never reused, so concurrent registrations cannot collide.

use std::{collections::HashSet, sync::Arc};

use fail::fail_point;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{
    config::FeatureConfig,
    error::{BrokerError, Result},
    factory::{FeatureConfigFactory, RawSettings},
    feature_store::FeatureConfigStore,
    registry::ClientRegistry,
    types::{ClientId, ClientSecret},
};

/// Outcome of a successful registration.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationResult {
    /// The new client's id.
    pub client_id: ClientId,
    /// Base64url (unpadded) client secret. Shown once, never stored.
    pub secret: String,
    /// Public factory output per feature key (generated public keys and the like).
    pub public_output: Map<String, Value>,
}

impl RegistrationResult {
    /// Compact display form of the client id.
    #[must_use]
    pub fn compact_client_id(&self) -> String {
        self.client_id.compact()
    }
}

/// Registers clients across the feature config stores and the registry.
#[derive(Clone)]
pub struct RegistrationOrchestrator {
    registry: ClientRegistry,
    stores: Vec<FeatureConfigStore>,
    factories: Vec<Arc<dyn FeatureConfigFactory>>,
}

impl RegistrationOrchestrator {
    /// Creates an orchestrator over `stores`, building configs with `factories`.
    pub fn new(
        registry: ClientRegistry,
        stores: Vec<FeatureConfigStore>,
        factories: impl IntoIterator<Item = Arc<dyn FeatureConfigFactory>>,
    ) -> Self {
        Self { registry, stores, factories: factories.into_iter().collect() }
    }

    /// The client registry.
    #[must_use]
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// The feature config stores.
    #[must_use]
    pub fn stores(&self) -> &[FeatureConfigStore] {
        &self.stores
    }

    /// Registers a client from `input`, a map of feature key to raw settings.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::UnsupportedFeature`] if no factory serves a feature key and discriminant
    /// - [`BrokerError::Validation`] listing every invalid field of every feature
    /// - [`BrokerError::PersistenceIntegrity`] if a config has no accepting store or a required
    ///   store is left without config
    /// - [`BrokerError::Storage`] if the backend fails
    ///
    /// On any error, everything written for the new client id has been
    /// removed again.
    #[tracing::instrument(skip(self, input), fields(features = input.len()))]
    pub async fn register(&self, input: &Map<String, Value>) -> Result<RegistrationResult> {
        let client_id = ClientId::generate();
        let secret = ClientSecret::generate();

        match self.register_as(&client_id, &secret, input).await {
            Ok(public_output) => {
                info!(client = %client_id, "Registered client");
                Ok(RegistrationResult { client_id, secret: secret.encode(), public_output })
            },
            Err(e) => {
                self.rollback(&client_id).await;
                Err(e)
            },
        }
    }

    async fn register_as(
        &self,
        client_id: &ClientId,
        secret: &ClientSecret,
        input: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let (configs, public_output) = self.build_configs(input)?;

        let mut unsatisfied: HashSet<usize> =
            self.stores.iter().enumerate().filter(|(_, store)| store.is_required()).map(|(i, _)| i).collect();

        fail_point!("registration-before-persist", |_| {
            Err(BrokerError::internal("injected failure before registration persist"))
        });

        for (key, config) in &configs {
            let mut accepted = false;
            for (index, store) in self.stores.iter().enumerate() {
                if !store.supports(config) {
                    continue;
                }
                store.persist(client_id, config, secret).await?;
                unsatisfied.remove(&index);
                accepted = true;
            }
            if !accepted {
                return Err(BrokerError::PersistenceIntegrity(format!(
                    "No store accepts the '{}' config of feature \"{key}\".",
                    config.type_name()
                )));
            }
        }

        if !unsatisfied.is_empty() {
            return Err(BrokerError::missing_required_data());
        }

        self.registry.touch(client_id).await?;
        Ok(public_output)
    }

    /// Runs every requested factory, collecting validation failures across features.
    fn build_configs(&self, input: &Map<String, Value>) -> Result<(Vec<(String, FeatureConfig)>, Map<String, Value>)> {
        let mut configs = Vec::with_capacity(input.len());
        let mut public_output = Map::new();
        let mut messages = Vec::new();

        for (key, raw) in input {
            let Some(settings) = raw.as_object() else {
                messages.push(format!("The \"{key}\" parameter must be an object."));
                continue;
            };
            let factory = self.factory_for(key, settings)?;
            match factory.create(settings) {
                Ok((config, output)) => {
                    if let Some(output) = output.filter(|o| !is_empty_output(o)) {
                        public_output.insert(key.clone(), output);
                    }
                    configs.push((key.clone(), config));
                },
                Err(BrokerError::Validation(message)) => messages.push(message),
                Err(e) => return Err(e),
            }
        }

        if !messages.is_empty() {
            return Err(BrokerError::Validation(messages.join("\n")));
        }
        Ok((configs, public_output))
    }

    fn factory_for(&self, key: &str, settings: &RawSettings) -> Result<&dyn FeatureConfigFactory> {
        self.factories.iter().find(|f| f.matches(key, settings)).map(|factory| &**factory).ok_or_else(|| {
            let hash = settings.get(crate::factory::DISCRIMINANT_FIELD).and_then(Value::as_str).unwrap_or(key);
            BrokerError::UnsupportedFeature { key: key.to_owned(), hash: hash.to_owned() }
        })
    }

    /// Best-effort removal of `client_id` from every store and the registry.
    async fn rollback(&self, client_id: &ClientId) {
        let ids = std::slice::from_ref(client_id);
        for store in &self.stores {
            if let Err(e) = store.remove(ids).await {
                warn!(client = %client_id, namespace = store.namespace(), error = %e, "Registration rollback failed for store");
            }
        }
        if let Err(e) = self.registry.remove(ids).await {
            warn!(client = %client_id, error = %e, "Registration rollback failed for registry");
        }
    }
}

impl std::fmt::Debug for RegistrationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationOrchestrator")
            .field("registry", &self.registry)
            .field("stores", &self.stores)
            .field("factories", &self.factories.len())
            .finish()
    }
}

fn is_empty_output(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
