//! Client lifecycle maintenance: unregistration, inactivity purge and
//! capacity enforcement.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::{
    error::{BrokerError, Result},
    feature_store::FeatureConfigStore,
    registry::ClientRegistry,
    types::ClientId,
};

/// Removes clients from the registry and every feature config store.
#[derive(Debug, Clone)]
pub struct ClientMaintenance {
    registry: ClientRegistry,
    stores: Vec<FeatureConfigStore>,
    inactivity: Duration,
    max_clients: Option<u64>,
}

impl ClientMaintenance {
    /// Creates a maintenance handle.
    ///
    /// Clients idle for longer than `inactivity` are purged; when
    /// `max_clients` is set, the oldest clients are evicted beyond it.
    pub fn new(
        registry: ClientRegistry,
        stores: Vec<FeatureConfigStore>,
        inactivity: Duration,
        max_clients: Option<u64>,
    ) -> Self {
        Self { registry, stores, inactivity, max_clients }
    }

    /// Removes one client, returning whether it was registered.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Storage`] if the backend fails.
    #[tracing::instrument(skip(self))]
    pub async fn unregister(&self, id: &ClientId) -> Result<bool> {
        let removed = self.remove_all(std::slice::from_ref(id)).await?;
        Ok(removed > 0)
    }

    /// Removes every client whose last access is at or before `now - inactivity`.
    ///
    /// Returns the removed ids. A failed inactivity scan removes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Storage`] if removal fails.
    #[tracing::instrument(skip(self))]
    pub async fn purge_inactive(&self, now: DateTime<Utc>) -> Result<Vec<ClientId>> {
        let inactivity = chrono::Duration::from_std(self.inactivity)
            .map_err(|_| BrokerError::internal("inactivity period out of range"))?;
        let inactive = self.registry.find_inactive_since(now - inactivity).await;
        if inactive.is_empty() {
            return Ok(inactive);
        }
        let removed = self.remove_all(&inactive).await?;
        info!(removed, "Purged inactive clients");
        Ok(inactive)
    }

    /// Evicts the oldest clients until the registry holds at most `max_clients`.
    ///
    /// Returns the evicted ids; empty when no cap is configured.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Storage`] if the backend fails.
    #[tracing::instrument(skip(self))]
    pub async fn enforce_capacity(&self) -> Result<Vec<ClientId>> {
        let Some(max) = self.max_clients else {
            return Ok(Vec::new());
        };
        let mut evicted = Vec::new();
        while self.registry.count().await? > max {
            let Some(oldest) = self.registry.find_oldest().await? else {
                break;
            };
            if self.remove_all(std::slice::from_ref(&oldest)).await? == 0 {
                warn!(client = %oldest, "Oldest client vanished during eviction");
            }
            evicted.push(oldest);
        }
        if !evicted.is_empty() {
            info!(evicted = evicted.len(), "Evicted clients over capacity");
        }
        Ok(evicted)
    }

    /// Removes `ids` from every store, then from the registry.
    async fn remove_all(&self, ids: &[ClientId]) -> Result<u64> {
        for store in &self.stores {
            store.remove(ids).await?;
        }
        self.registry.remove(ids).await
    }
}
