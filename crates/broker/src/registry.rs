//! Client registry: `client id -> last access` (UNIX seconds).
//!
//! The registry is the authority on which clients exist. Feature config
//! stores may briefly hold entries for an id the registry does not know (a
//! registration in flight); the converse never holds.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tessera_storage::StorageBackend;
use tracing::{debug, warn};

use crate::{
    error::{BrokerError, Result},
    types::ClientId,
};

/// Default registry namespace.
pub const DEFAULT_REGISTRY_NAMESPACE: &str = "clients";

/// Hash map of registered clients and their last access time.
#[derive(Clone)]
pub struct ClientRegistry {
    backend: Arc<dyn StorageBackend>,
    namespace: String,
}

impl ClientRegistry {
    /// Creates a registry in `namespace`.
    pub fn new(backend: Arc<dyn StorageBackend>, namespace: impl Into<String>) -> Self {
        Self { backend, namespace: namespace.into() }
    }

    /// Namespace holding the registry.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns `true` if `id` is registered, refreshing its last access when `touch` is set.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Storage`] if the backend fails.
    #[tracing::instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn exists(&self, id: &ClientId, touch: bool) -> Result<bool> {
        let found = self.backend.exists(&self.namespace, &id.raw()).await?;
        if found && touch {
            self.touch(id).await?;
        }
        Ok(found)
    }

    /// Sets the last access of `id` to now, registering it if absent.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Storage`] if the backend fails.
    pub async fn touch(&self, id: &ClientId) -> Result<()> {
        self.touch_at(id, Utc::now()).await
    }

    /// Sets the last access of `id` to `at`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Storage`] if the backend fails.
    #[tracing::instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn touch_at(&self, id: &ClientId, at: DateTime<Utc>) -> Result<()> {
        let value = at.timestamp().to_string().into_bytes();
        self.backend.set(&self.namespace, &id.raw(), value).await?;
        Ok(())
    }

    /// Last access of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotFound`] if `id` is not registered and
    /// [`BrokerError::Internal`] if the stored value is not a timestamp.
    pub async fn last_access(&self, id: &ClientId) -> Result<DateTime<Utc>> {
        let raw = self
            .backend
            .get(&self.namespace, &id.raw())
            .await?
            .ok_or_else(|| BrokerError::NotFound(format!("client {id}")))?;
        parse_timestamp(&raw)
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| BrokerError::internal(format!("corrupt last-access value for client {id}")))
    }

    /// Every client whose last access is at or before `cutoff`.
    ///
    /// The scan runs as one backend operation. If it fails, the failure is
    /// logged and an empty list is returned.
    #[tracing::instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn find_inactive_since(&self, cutoff: DateTime<Utc>) -> Vec<ClientId> {
        let cutoff = cutoff.timestamp();
        let filter = move |value: &[u8]| parse_timestamp(value).is_some_and(|secs| secs <= cutoff);

        match self.backend.scan(&self.namespace, &filter).await {
            Ok(fields) => fields.iter().filter_map(|field| ClientId::parse(field).ok()).collect(),
            Err(e) => {
                warn!(error = %e, "Inactivity scan failed, reporting no inactive clients");
                Vec::new()
            },
        }
    }

    /// The oldest registered client, by id order.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Storage`] if the backend fails.
    pub async fn find_oldest(&self) -> Result<Option<ClientId>> {
        let Some(field) = self.backend.first_field(&self.namespace).await? else {
            return Ok(None);
        };
        ClientId::parse(&field).map(Some)
    }

    /// Number of registered clients.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Storage`] if the backend fails.
    pub async fn count(&self) -> Result<u64> {
        Ok(self.backend.count(&self.namespace).await?)
    }

    /// Removes `ids`, returning how many were registered.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Storage`] if the backend fails.
    #[tracing::instrument(skip(self, ids), fields(namespace = %self.namespace, count = ids.len()))]
    pub async fn remove(&self, ids: &[ClientId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let fields: Vec<String> = ids.iter().map(ClientId::raw).collect();
        let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
        let removed = self.backend.delete(&self.namespace, &fields).await?;
        debug!(removed, "Removed clients from registry");
        Ok(removed)
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry").field("namespace", &self.namespace).finish_non_exhaustive()
    }
}

fn parse_timestamp(value: &[u8]) -> Option<i64> {
    std::str::from_utf8(value).ok()?.trim().parse().ok()
}
