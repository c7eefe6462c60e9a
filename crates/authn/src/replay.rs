//! Request signature replay prevention.
//!
//! A signed request stays valid for its client's request TTL. Within that
//! window an intercepted URL could be replayed verbatim. When enabled, the
//! replay detector remembers every accepted signature until its window
//! closes and rejects a second presentation.
//!
//! # Usage
//!
//! ```no_run
//! use tessera_authn::replay::InMemoryReplayDetector;
//!
//! // Track at most 10_000 signatures at once
//! let detector = InMemoryReplayDetector::new(10_000);
//! ```
//!
//! # Design
//!
//! - **Opt-in**: enabled by setting `replay_capacity` in the trust configuration.
//! - **Per-entry expiry**: each signature expires with its request window.
//! - **Capacity-bounded**: LRU eviction beyond per-entry TTL.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::{future::Cache, policy::EvictionPolicy};

use crate::error::AuthError;

/// Tracks presented request signatures.
#[async_trait]
pub trait ReplayDetector: Send + Sync {
    /// Records `signature` as seen for `window`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SignatureReplayed`] if `signature` was already
    /// recorded and its window has not closed.
    async fn check_and_mark(&self, signature: &str, window: Duration) -> Result<(), AuthError>;
}

/// Expiry policy reading the absolute deadline stored as the entry value.
struct SignatureExpiry;

impl moka::Expiry<String, Instant> for SignatureExpiry {
    fn expire_after_create(&self, _key: &String, value: &Instant, created_at: Instant) -> Option<Duration> {
        Some(value.saturating_duration_since(created_at))
    }
}

/// In-memory replay detector backed by a [`moka::future::Cache`].
pub struct InMemoryReplayDetector {
    /// Signature → end of its validity window.
    seen: Cache<String, Instant>,
}

impl InMemoryReplayDetector {
    /// Creates a detector tracking at most `max_capacity` signatures.
    pub fn new(max_capacity: u64) -> Self {
        let seen = Cache::builder()
            .max_capacity(max_capacity)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(SignatureExpiry)
            .build();
        Self { seen }
    }
}

impl std::fmt::Debug for InMemoryReplayDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryReplayDetector").field("tracked", &self.seen.entry_count()).finish()
    }
}

#[async_trait]
impl ReplayDetector for InMemoryReplayDetector {
    async fn check_and_mark(&self, signature: &str, window: Duration) -> Result<(), AuthError> {
        let entry = self.seen.entry(signature.to_owned()).or_insert(Instant::now() + window).await;
        if entry.is_fresh() { Ok(()) } else { Err(AuthError::SignatureReplayed) }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_presentation_accepted() {
        let detector = InMemoryReplayDetector::new(100);
        assert!(detector.check_and_mark("sig-001", Duration::from_secs(60)).await.is_ok());
    }

    #[tokio::test]
    async fn test_second_presentation_rejected() {
        let detector = InMemoryReplayDetector::new(100);
        detector.check_and_mark("sig-002", Duration::from_secs(60)).await.unwrap();

        let result = detector.check_and_mark("sig-002", Duration::from_secs(60)).await;
        assert!(matches!(result, Err(AuthError::SignatureReplayed)));
    }

    #[tokio::test]
    async fn test_different_signatures_accepted() {
        let detector = InMemoryReplayDetector::new(100);
        detector.check_and_mark("sig-a", Duration::from_secs(60)).await.unwrap();
        assert!(detector.check_and_mark("sig-b", Duration::from_secs(60)).await.is_ok());
    }

    #[tokio::test]
    async fn test_signature_accepted_again_after_window() {
        let detector = InMemoryReplayDetector::new(100);
        detector.check_and_mark("sig-expire", Duration::from_millis(50)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        detector.seen.run_pending_tasks().await;

        assert!(detector.check_and_mark("sig-expire", Duration::from_secs(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_capacity_eviction() {
        let detector = InMemoryReplayDetector::new(2);

        detector.check_and_mark("sig-1", Duration::from_secs(300)).await.unwrap();
        detector.check_and_mark("sig-2", Duration::from_secs(300)).await.unwrap();
        detector.check_and_mark("sig-3", Duration::from_secs(300)).await.unwrap();

        detector.seen.run_pending_tasks().await;

        // sig-1 is least recently used
        assert!(detector.check_and_mark("sig-1", Duration::from_secs(300)).await.is_ok());
    }
}
