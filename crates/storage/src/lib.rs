//! Shared backing-store abstraction for the Tessera SSO broker.
//!
//! This crate provides the two storage shapes every broker component is
//! written against:
//!
//! - [`StorageBackend`]: namespaced hash maps with atomic per-field operations and one atomic
//!   scan-and-filter primitive. Used by the client registry and the encrypted feature config
//!   stores.
//! - [`CachePool`]: a tag-aware cache with a pool-wide expiry policy. Used by the session store,
//!   one pool per realm.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    tessera-broker                           │
//! │  ClientRegistry │ FeatureConfigStore │ SessionStore         │
//! ├─────────────────────────────────┬───────────────────────────┤
//! │         StorageBackend          │        CachePool          │
//! │ (exists, get, set, delete, scan)│ (get, insert, tags, TTL)  │
//! ├─────────────────────────────────┼───────────────────────────┤
//! │          MemoryBackend          │     MemoryCachePool       │
//! └─────────────────────────────────┴───────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use tessera_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set("clients", "0193a1f0", b"1700000000".to_vec()).await?;
//!     assert!(backend.exists("clients", "0193a1f0").await?);
//!
//!     let removed = backend.delete("clients", &["0193a1f0"]).await?;
//!     assert_eq!(removed, 1);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with failure-injecting backends and assertion
//!   helpers. Enable this in `[dev-dependencies]` for integration tests.

#![deny(unsafe_code)]

pub mod backend;
pub mod cache;
pub mod error;
pub mod memory;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;

// Re-export primary types at crate root for convenience
pub use backend::{StorageBackend, ValueFilter};
pub use cache::{CacheItem, CachePool, MemoryCachePool};
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use memory::MemoryBackend;
