//! Ticket-keyed session storage.
//!
//! Each realm has its own [`CachePool`]. An entry lives under
//! `sha256(realm, ticket)`, so neither the ticket nor another realm's key can
//! be derived from it. The value is the user's attributes sealed under the
//! ticket itself, and the user id is kept as the entry's only tag so every
//! session of a user can be dropped at once.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use fail::fail_point;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tessera_storage::CachePool;
use tracing::{debug, warn};

use crate::{
    crypto::KeyedCipher,
    error::{BrokerError, Result},
    types::{Realm, Ticket},
};

/// User attributes carried by a session.
pub type Attributes = BTreeMap<String, Value>;

/// A decrypted session entry.
#[derive(Debug, Clone, PartialEq)]
pub struct UserAttributesItem {
    /// User id, recovered from the entry's tag.
    pub identifier: String,
    /// Attributes recorded at login.
    pub attributes: Attributes,
    /// Time until the entry expires, if the pool expires entries.
    pub ttl: Option<Duration>,
}

/// Per-realm session pools sharing one cipher.
#[derive(Clone)]
pub struct SessionStore {
    pools: BTreeMap<Realm, Arc<dyn CachePool>>,
    cipher: Arc<KeyedCipher>,
}

impl SessionStore {
    /// Creates a store over `pools`.
    pub fn new(cipher: Arc<KeyedCipher>, pools: impl IntoIterator<Item = (Realm, Arc<dyn CachePool>)>) -> Self {
        Self { pools: pools.into_iter().collect(), cipher }
    }

    /// Configured realms.
    pub fn realms(&self) -> impl Iterator<Item = &Realm> {
        self.pools.keys()
    }

    fn pool(&self, realm: &Realm) -> Result<&Arc<dyn CachePool>> {
        self.pools.get(realm).ok_or_else(|| BrokerError::NotFound(format!("realm '{realm}'")))
    }

    /// Returns `true` if a session exists for `ticket`. Does not decrypt.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotFound`] for an unknown realm, or a storage error.
    pub async fn exists(&self, realm: &Realm, ticket: &Ticket) -> Result<bool> {
        Ok(self.pool(realm)?.contains(&session_key(realm, ticket)).await?)
    }

    /// Stores `attributes` for `user_id`, returning the ticket.
    ///
    /// A new ticket is minted when `ticket` is `None`. Any existing session
    /// under the ticket is replaced wholesale.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotFound`] for an unknown realm, or a storage error.
    #[tracing::instrument(skip(self, attributes, ticket), fields(realm = %realm))]
    pub async fn persist(
        &self,
        realm: &Realm,
        user_id: &str,
        attributes: &Attributes,
        ticket: Option<Ticket>,
    ) -> Result<Ticket> {
        let pool = self.pool(realm)?;
        let ticket = ticket.unwrap_or_else(Ticket::generate);
        let key = session_key(realm, &ticket);

        let plaintext = serde_json::to_vec(attributes)
            .map_err(|e| BrokerError::internal(format!("failed to serialize session attributes: {e}")))?;
        let sealed = self.cipher.encrypt(&plaintext, ticket.as_bytes())?;

        pool.delete(&key).await?;
        pool.insert(&key, sealed, BTreeSet::from([user_id.to_owned()])).await?;
        Ok(ticket)
    }

    /// Restarts the expiry of the session under `ticket`.
    ///
    /// Returns `false` if there is no such session or the old entry could not
    /// be removed.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotFound`] for an unknown realm, or a storage
    /// error from the re-insert.
    #[tracing::instrument(skip(self, ticket), fields(realm = %realm))]
    pub async fn prolong(&self, realm: &Realm, ticket: &Ticket) -> Result<bool> {
        let pool = self.pool(realm)?;
        let key = session_key(realm, ticket);

        let Some(item) = pool.get(&key).await? else {
            debug!("No session to prolong");
            return Ok(false);
        };
        if let Err(e) = pool.delete(&key).await {
            warn!(error = %e, "Failed to remove session before prolonging it");
            return Ok(false);
        }

        fail_point!("session-before-prolong-insert", |_| {
            Err(BrokerError::internal("injected failure before session re-insert"))
        });

        pool.insert(&key, item.value.to_vec(), item.tags).await?;
        Ok(true)
    }

    /// Loads and decrypts the session under `ticket`.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::Internal`] if the entry carries no user tag
    /// - [`BrokerError::Decryption`] or [`BrokerError::Domain`] if the value cannot be opened with
    ///   `ticket`
    /// - [`BrokerError::NotFound`] for an unknown realm, or a storage error
    #[tracing::instrument(skip(self, ticket), fields(realm = %realm))]
    pub async fn find(&self, realm: &Realm, ticket: &Ticket) -> Result<Option<UserAttributesItem>> {
        let Some(item) = self.pool(realm)?.get(&session_key(realm, ticket)).await? else {
            debug!("Session miss");
            return Ok(None);
        };
        let identifier = item
            .tags
            .iter()
            .next()
            .cloned()
            .ok_or_else(|| BrokerError::internal("session entry has no user tag"))?;

        let plaintext = self.cipher.decrypt(&item.value, ticket.as_bytes())?;
        let attributes: Attributes =
            serde_json::from_slice(&plaintext).map_err(|_| BrokerError::domain("corrupt session attributes"))?;

        debug!("Session hit");
        Ok(Some(UserAttributesItem { identifier, attributes, ttl: item.remaining(Utc::now()) }))
    }

    /// Deletes the session under `ticket`, returning whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotFound`] for an unknown realm, or a storage error.
    pub async fn remove(&self, realm: &Realm, ticket: &Ticket) -> Result<bool> {
        Ok(self.pool(realm)?.delete(&session_key(realm, ticket)).await?)
    }

    /// Drops every session of `user_id` in every realm.
    ///
    /// Returns `false` if any realm failed. Realms that succeeded stay
    /// cleared.
    #[tracing::instrument(skip(self))]
    pub async fn remove_by_user(&self, user_id: &str) -> bool {
        let mut all_ok = true;
        for (realm, pool) in &self.pools {
            match pool.invalidate_tags(&[user_id]).await {
                Ok(removed) => debug!(realm = %realm, removed, "Invalidated user sessions"),
                Err(e) => {
                    warn!(realm = %realm, error = %e, "Failed to invalidate user sessions");
                    all_ok = false;
                },
            }
        }
        all_ok
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").field("realms", &self.pools.keys().collect::<Vec<_>>()).finish_non_exhaustive()
    }
}

/// Cache key of the session under `ticket` in `realm`.
fn session_key(realm: &Realm, ticket: &Ticket) -> String {
    let mut hasher = Sha256::new();
    hasher.update((realm.as_str().len() as u64).to_be_bytes());
    hasher.update(realm.as_str().as_bytes());
    hasher.update(ticket.as_bytes());
    hex::encode(hasher.finalize())
}
