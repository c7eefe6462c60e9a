//! Storage backend trait definition.
//!
//! This module defines the [`StorageBackend`] trait, the hash-map abstraction
//! every persistent component of the broker is written against.
//!
//! # Data Model
//!
//! A backend holds any number of **namespaces**. Each namespace is a hash map
//! from a string **field** to an opaque byte value:
//!
//! ```text
//! clients            field = client id   value = last access (decimal seconds)
//! feature:signature  field = client id   value = ciphertext
//! feature:token      field = client id   value = ciphertext
//! ```
//!
//! Every single-field operation is atomic. Multi-field sequences are not;
//! callers that need all-or-nothing behaviour compensate on failure.
//!
//! # Implementing a Backend
//!
//! 1. Implement the [`StorageBackend`] trait
//! 2. Make [`scan`](StorageBackend::scan) evaluate its filter server-side, in one step
//! 3. Map backend-specific errors to [`StorageError`](crate::StorageError)
//!
//! See [`MemoryBackend`](crate::MemoryBackend) for a reference implementation.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// Filter evaluated against every value of a namespace during a
/// [`scan`](StorageBackend::scan).
pub type ValueFilter<'a> = &'a (dyn Fn(&[u8]) -> bool + Send + Sync);

/// Abstract hash-map storage backend.
///
/// Backends are expected to be thread-safe (`Send + Sync`) and are shared
/// behind an [`Arc`](std::sync::Arc) by every store that uses them.
///
/// # Key Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`exists`](StorageBackend::exists) | Test whether a field is present |
/// | [`get`](StorageBackend::get) | Retrieve a single field |
/// | [`set`](StorageBackend::set) | Store a field, overwriting any previous value |
/// | [`delete`](StorageBackend::delete) | Remove fields, returning how many existed |
/// | [`first_field`](StorageBackend::first_field) | Lexicographically smallest field |
/// | [`scan`](StorageBackend::scan) | Atomic scan-and-filter by value |
/// | [`count`](StorageBackend::count) | Number of fields in a namespace |
/// | [`health_check`](StorageBackend::health_check) | Verify backend availability |
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use tessera_storage::{MemoryBackend, StorageBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
///
/// backend.set("clients", "0193a1", b"1700000000".to_vec()).await.unwrap();
/// let value = backend.get("clients", "0193a1").await.unwrap();
/// assert_eq!(value, Some(Bytes::from("1700000000")));
/// # });
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Returns `true` if `field` is present in `namespace`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn exists(&self, namespace: &str, field: &str) -> StorageResult<bool>;

    /// Retrieves the value stored at `field`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` if the field exists
    /// - `Ok(None)` if the field doesn't exist
    /// - `Err(...)` on storage errors
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, namespace: &str, field: &str) -> StorageResult<Option<Bytes>>;

    /// Stores `value` at `field`, overwriting any previous value.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, namespace: &str, field: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Deletes every field in `fields`.
    ///
    /// Missing fields are ignored. Returns the number of fields that were
    /// actually removed. An empty slice is a no-op returning `0`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, namespace: &str, fields: &[&str]) -> StorageResult<u64>;

    /// Returns the lexicographically smallest field of `namespace`, if any.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn first_field(&self, namespace: &str) -> StorageResult<Option<String>>;

    /// Returns every field whose value satisfies `filter`.
    ///
    /// The scan is a single atomic step on the backend: no write interleaves
    /// with it. Fields are returned in lexicographic order.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn scan(&self, namespace: &str, filter: ValueFilter<'_>) -> StorageResult<Vec<String>>;

    /// Returns the number of fields in `namespace`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn count(&self, namespace: &str) -> StorageResult<u64>;

    /// Checks that the backend can serve requests.
    #[must_use = "health check results indicate backend availability and must be inspected"]
    async fn health_check(&self) -> StorageResult<()>;
}
