//! Tag-aware cache pools.
//!
//! A [`CachePool`] is a key-value cache whose entries expire according to
//! the pool's own lifetime policy and carry a set of **tags**. Tags allow
//! bulk invalidation of every entry that shares them, regardless of key.
//!
//! The broker keeps one pool per realm for sessions and tags each entry
//! with the owning user's identifier.
//!
//! # Example
//!
//! ```
//! use std::{collections::BTreeSet, time::Duration};
//! use tessera_storage::{CachePool, MemoryCachePool};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let pool = MemoryCachePool::new(Some(Duration::from_secs(3600)));
//!
//! let tags = BTreeSet::from(["user-42".to_owned()]);
//! pool.insert("k1", b"v1".to_vec(), tags).await.unwrap();
//! assert!(pool.contains("k1").await.unwrap());
//!
//! pool.invalidate_tags(&["user-42"]).await.unwrap();
//! assert!(!pool.contains("k1").await.unwrap());
//! # });
//! ```

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use moka::{future::Cache, notification::RemovalCause};
use parking_lot::Mutex;

use crate::error::StorageResult;

/// A cached value together with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    /// The stored bytes.
    pub value: Bytes,
    /// Tags attached at insertion time.
    pub tags: BTreeSet<String>,
    /// When the entry expires, if the pool has a lifetime.
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheItem {
    /// Remaining lifetime relative to `now`, saturating at zero.
    ///
    /// Returns `None` for entries that never expire.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at.map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Tag-aware cache with a pool-wide expiry policy.
#[async_trait]
pub trait CachePool: Send + Sync {
    /// Returns `true` if a live entry exists for `key`.
    async fn contains(&self, key: &str) -> StorageResult<bool>;

    /// Retrieves the live entry for `key`.
    async fn get(&self, key: &str) -> StorageResult<Option<CacheItem>>;

    /// Stores `value` under `key` with `tags`, replacing any previous entry.
    ///
    /// Expiry follows [`default_lifetime`](Self::default_lifetime).
    async fn insert(&self, key: &str, value: Vec<u8>, tags: BTreeSet<String>) -> StorageResult<()>;

    /// Removes the entry for `key`. Returns `true` if an entry was removed.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Removes every entry carrying at least one of `tags`.
    ///
    /// Returns the number of entries removed.
    async fn invalidate_tags(&self, tags: &[&str]) -> StorageResult<u64>;

    /// Lifetime applied to every inserted entry, `None` for no expiry.
    fn default_lifetime(&self) -> Option<Duration>;
}

/// In-memory [`CachePool`] backed by a [`moka::future::Cache`].
///
/// Entry expiry is enforced by moka's time-to-live. Tags are tracked in a
/// side index mapping each tag to the keys inserted with it. Every stored
/// entry carries a generation number and the index records the generation it
/// was indexed under, so an eviction notice for a replaced entry never
/// untracks its successor. Expired entries leave the index through moka's
/// eviction listener.
///
/// # Cloning
///
/// Clones share the same underlying cache and tag index.
#[derive(Clone)]
pub struct MemoryCachePool {
    entries: Cache<String, Arc<Slot>>,
    tag_index: Arc<Mutex<TagIndex>>,
    generation: Arc<AtomicU64>,
    lifetime: Option<Duration>,
}

#[derive(Debug)]
struct Slot {
    item: CacheItem,
    generation: u64,
}

/// tag -> key -> generation of the indexed entry
type TagIndex = HashMap<String, HashMap<String, u64>>;

fn untrack(index: &Mutex<TagIndex>, key: &str, slot: &Slot) {
    let mut index = index.lock();
    for tag in &slot.item.tags {
        if let Some(keys) = index.get_mut(tag) {
            if keys.get(key) == Some(&slot.generation) {
                keys.remove(key);
            }
            if keys.is_empty() {
                index.remove(tag);
            }
        }
    }
}

impl MemoryCachePool {
    /// Creates an unbounded pool whose entries live for `lifetime`.
    #[must_use]
    pub fn new(lifetime: Option<Duration>) -> Self {
        let tag_index: Arc<Mutex<TagIndex>> = Arc::new(Mutex::new(HashMap::new()));

        let listener_index = Arc::clone(&tag_index);
        let mut builder = Cache::<String, Arc<Slot>>::builder().eviction_listener(
            move |key: Arc<String>, slot: Arc<Slot>, cause: RemovalCause| {
                if cause.was_evicted() {
                    untrack(&listener_index, &key, &slot);
                }
            },
        );
        if let Some(ttl) = lifetime {
            builder = builder.time_to_live(ttl);
        }

        Self { entries: builder.build(), tag_index, generation: Arc::new(AtomicU64::new(0)), lifetime }
    }
}

impl std::fmt::Debug for MemoryCachePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCachePool")
            .field("entries", &self.entries.entry_count())
            .field("tags", &self.tag_index.lock().len())
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

#[async_trait]
impl CachePool for MemoryCachePool {
    async fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.contains_key(key))
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, key: &str) -> StorageResult<Option<CacheItem>> {
        Ok(self.entries.get(key).await.map(|slot| slot.item.clone()))
    }

    #[tracing::instrument(skip(self, value), fields(value_len = value.len()))]
    async fn insert(&self, key: &str, value: Vec<u8>, tags: BTreeSet<String>) -> StorageResult<()> {
        let expires_at = self
            .lifetime
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| Utc::now() + ttl);

        if let Some(previous) = self.entries.remove(key).await {
            untrack(&self.tag_index, key, &previous);
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Slot { item: CacheItem { value: Bytes::from(value), tags, expires_at }, generation });

        // Stored before indexed: every index record points at an entry that existed.
        self.entries.insert(key.to_owned(), Arc::clone(&slot)).await;

        let mut index = self.tag_index.lock();
        for tag in &slot.item.tags {
            index.entry(tag.clone()).or_default().insert(key.to_owned(), generation);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, key: &str) -> StorageResult<bool> {
        match self.entries.remove(key).await {
            Some(previous) => {
                untrack(&self.tag_index, key, &previous);
                Ok(true)
            },
            None => Ok(false),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn invalidate_tags(&self, tags: &[&str]) -> StorageResult<u64> {
        let candidates: HashMap<String, u64> = {
            let mut index = self.tag_index.lock();
            tags.iter().filter_map(|tag| index.remove(*tag)).flatten().collect()
        };

        let mut removed = 0;
        for (key, generation) in candidates {
            // A newer entry under the same key was indexed after this snapshot.
            let Some(current) = self.entries.get(&key).await else { continue };
            if current.generation != generation {
                continue;
            }
            if let Some(previous) = self.entries.remove(&key).await {
                untrack(&self.tag_index, &key, &previous);
                removed += 1;
            }
        }

        tracing::debug!(removed, "invalidated tagged cache entries");
        Ok(removed)
    }

    fn default_lifetime(&self) -> Option<Duration> {
        self.lifetime
    }
}
