//! Shared test utilities for storage-dependent testing.
//!
//! This module provides failure-injecting wrappers around the in-memory
//! backends so that callers can verify their compensation and degradation
//! paths. It is feature-gated behind `testutil` to prevent leaking into
//! production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! tessera-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use tessera_storage::testutil::FailingBackend;
//! ```

use std::{
    collections::{BTreeSet, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    backend::{StorageBackend, ValueFilter},
    cache::{CacheItem, CachePool, MemoryCachePool},
    error::{StorageError, StorageResult},
    memory::MemoryBackend,
};

/// A wrapper around [`MemoryBackend`] that injects failures.
///
/// Each call to [`set`](StorageBackend::set) increments a counter (starting
/// at 0); if the counter value is in `fail_sets`, the write fails with
/// [`StorageError::Connection`] and nothing is stored. Scans and deletes can
/// be switched to fail wholesale.
#[derive(Clone, Default)]
pub struct FailingBackend {
    inner: MemoryBackend,
    set_count: Arc<AtomicUsize>,
    fail_sets: Arc<HashSet<usize>>,
    fail_scan: Arc<AtomicBool>,
    fail_delete: Arc<AtomicBool>,
}

impl FailingBackend {
    /// Wraps `inner`, failing the `set` calls whose zero-based index is in `fail_sets`.
    #[must_use]
    pub fn new(inner: MemoryBackend, fail_sets: impl IntoIterator<Item = usize>) -> Self {
        Self {
            inner,
            set_count: Arc::new(AtomicUsize::new(0)),
            fail_sets: Arc::new(fail_sets.into_iter().collect()),
            fail_scan: Arc::new(AtomicBool::new(false)),
            fail_delete: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes every subsequent [`scan`](StorageBackend::scan) fail.
    pub fn fail_scans(&self, fail: bool) {
        self.fail_scan.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent [`delete`](StorageBackend::delete) fail.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Number of `set` calls observed so far, failed ones included.
    #[must_use]
    pub fn set_calls(&self) -> usize {
        self.set_count.load(Ordering::SeqCst)
    }

    /// The wrapped backend, for direct inspection.
    #[must_use]
    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }
}

#[async_trait]
impl StorageBackend for FailingBackend {
    async fn exists(&self, namespace: &str, field: &str) -> StorageResult<bool> {
        self.inner.exists(namespace, field).await
    }

    async fn get(&self, namespace: &str, field: &str) -> StorageResult<Option<Bytes>> {
        self.inner.get(namespace, field).await
    }

    async fn set(&self, namespace: &str, field: &str, value: Vec<u8>) -> StorageResult<()> {
        let call = self.set_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_sets.contains(&call) {
            return Err(StorageError::connection(format!("simulated failure of set #{call}")));
        }
        self.inner.set(namespace, field, value).await
    }

    async fn delete(&self, namespace: &str, fields: &[&str]) -> StorageResult<u64> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StorageError::connection("simulated delete failure"));
        }
        self.inner.delete(namespace, fields).await
    }

    async fn first_field(&self, namespace: &str) -> StorageResult<Option<String>> {
        self.inner.first_field(namespace).await
    }

    async fn scan(&self, namespace: &str, filter: ValueFilter<'_>) -> StorageResult<Vec<String>> {
        if self.fail_scan.load(Ordering::SeqCst) {
            return Err(StorageError::Timeout);
        }
        self.inner.scan(namespace, filter).await
    }

    async fn count(&self, namespace: &str) -> StorageResult<u64> {
        self.inner.count(namespace).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }
}

/// A wrapper around [`MemoryCachePool`] whose mutating operations can be
/// switched to fail.
#[derive(Clone, Debug)]
pub struct FailingCachePool {
    inner: MemoryCachePool,
    fail_delete: Arc<AtomicBool>,
    fail_invalidate: Arc<AtomicBool>,
}

impl FailingCachePool {
    /// Creates a pool with the given lifetime and no failures enabled.
    #[must_use]
    pub fn new(lifetime: Option<Duration>) -> Self {
        Self {
            inner: MemoryCachePool::new(lifetime),
            fail_delete: Arc::new(AtomicBool::new(false)),
            fail_invalidate: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes every subsequent [`delete`](CachePool::delete) fail.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent [`invalidate_tags`](CachePool::invalidate_tags) fail.
    pub fn fail_invalidations(&self, fail: bool) {
        self.fail_invalidate.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CachePool for FailingCachePool {
    async fn contains(&self, key: &str) -> StorageResult<bool> {
        self.inner.contains(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Option<CacheItem>> {
        self.inner.get(key).await
    }

    async fn insert(&self, key: &str, value: Vec<u8>, tags: BTreeSet<String>) -> StorageResult<()> {
        self.inner.insert(key, value, tags).await
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StorageError::connection("simulated cache delete failure"));
        }
        self.inner.delete(key).await
    }

    async fn invalidate_tags(&self, tags: &[&str]) -> StorageResult<u64> {
        if self.fail_invalidate.load(Ordering::SeqCst) {
            return Err(StorageError::connection("simulated tag invalidation failure"));
        }
        self.inner.invalidate_tags(tags).await
    }

    fn default_lifetime(&self) -> Option<Duration> {
        self.inner.default_lifetime()
    }
}

/// Asserts that `namespace` holds no fields at all.
///
/// # Panics
///
/// Panics if the namespace is non-empty or the backend fails.
pub async fn assert_namespace_empty(backend: &dyn StorageBackend, namespace: &str) {
    let count = backend.count(namespace).await.unwrap_or_else(|e| panic!("count failed: {e}"));
    assert_eq!(count, 0, "expected namespace '{namespace}' to be empty, found {count} fields");
}
