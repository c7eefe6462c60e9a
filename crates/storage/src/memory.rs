//! In-memory storage backend implementation.
//!
//! This module provides [`MemoryBackend`], an in-memory implementation of
//! [`StorageBackend`] suitable for testing, development and single-node
//! deployments where persistence is not required.
//!
//! # Features
//!
//! - **Thread-safe**: Uses [`parking_lot::RwLock`] for concurrent access
//! - **Ordered storage**: Fields are kept in a [`BTreeMap`], so
//!   [`first_field`](StorageBackend::first_field) is a cheap lookup
//! - **Atomic scans**: [`scan`](StorageBackend::scan) holds the read lock for the whole pass
//!
//! # Example
//!
//! ```
//! use tessera_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set("greetings", "en", b"hello".to_vec()).await.unwrap();
//!     let value = backend.get("greetings", "en").await.unwrap();
//!
//!     assert_eq!(value.unwrap().as_ref(), b"hello");
//! }
//! ```
//!
//! # Performance Characteristics
//!
//! | Operation | Complexity |
//! |-----------|------------|
//! | get | O(log n) |
//! | set | O(log n) |
//! | delete | O(k log n) for k fields |
//! | first_field | O(log n) |
//! | scan | O(n) |
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - No replication or distributed features

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
    backend::{StorageBackend, ValueFilter},
    error::StorageResult,
};

type Namespace = BTreeMap<String, Bytes>;

/// In-memory storage backend using nested [`BTreeMap`]s.
///
/// # Cloning
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying data store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<String, Namespace>>>,
}

impl MemoryBackend {
    /// Creates a new, empty in-memory storage backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(skip(self))]
    async fn exists(&self, namespace: &str, field: &str) -> StorageResult<bool> {
        let data = self.data.read();
        Ok(data.get(namespace).is_some_and(|ns| ns.contains_key(field)))
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, namespace: &str, field: &str) -> StorageResult<Option<Bytes>> {
        let data = self.data.read();
        Ok(data.get(namespace).and_then(|ns| ns.get(field)).cloned())
    }

    #[tracing::instrument(skip(self, value), fields(value_len = value.len()))]
    async fn set(&self, namespace: &str, field: &str, value: Vec<u8>) -> StorageResult<()> {
        let mut data = self.data.write();
        data.entry(namespace.to_owned()).or_default().insert(field.to_owned(), Bytes::from(value));
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, namespace: &str, fields: &[&str]) -> StorageResult<u64> {
        if fields.is_empty() {
            return Ok(0);
        }

        let mut data = self.data.write();
        let Some(ns) = data.get_mut(namespace) else {
            return Ok(0);
        };

        let removed = fields.iter().filter(|field| ns.remove(**field).is_some()).count() as u64;

        if ns.is_empty() {
            data.remove(namespace);
        }

        Ok(removed)
    }

    #[tracing::instrument(skip(self))]
    async fn first_field(&self, namespace: &str) -> StorageResult<Option<String>> {
        let data = self.data.read();
        Ok(data.get(namespace).and_then(|ns| ns.keys().next().cloned()))
    }

    #[tracing::instrument(skip(self, filter))]
    async fn scan(&self, namespace: &str, filter: ValueFilter<'_>) -> StorageResult<Vec<String>> {
        // The read lock is held for the whole pass so no writer interleaves.
        let data = self.data.read();
        let Some(ns) = data.get(namespace) else {
            return Ok(Vec::new());
        };

        Ok(ns.iter().filter(|(_, value)| filter(value)).map(|(field, _)| field.clone()).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn count(&self, namespace: &str) -> StorageResult<u64> {
        let data = self.data.read();
        Ok(data.get(namespace).map_or(0, |ns| ns.len() as u64))
    }

    async fn health_check(&self) -> StorageResult<()> {
        // Try to acquire read lock to verify we're not deadlocked
        let _unused = self.data.read();
        Ok(())
    }
}
