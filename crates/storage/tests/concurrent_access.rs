//! Concurrent access to the in-memory backends.
//!
//! Registrations of distinct clients write disjoint fields of shared
//! namespaces while maintenance scans them; sessions of one user are written
//! from several requests at once and then invalidated by tag.

#![allow(clippy::expect_used, clippy::panic)]

use std::{collections::BTreeSet, sync::Arc};

use tessera_storage::{CachePool, MemoryBackend, MemoryCachePool, StorageBackend};

const WRITERS: usize = 8;
const FIELDS_PER_WRITER: usize = 50;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_disjoint_sets_are_all_visible() {
    let backend = Arc::new(MemoryBackend::new());

    let mut handles = Vec::new();
    for writer in 0..WRITERS {
        let backend = Arc::clone(&backend);
        handles.push(tokio::spawn(async move {
            for i in 0..FIELDS_PER_WRITER {
                let field = format!("client-{writer}-{i}");
                backend.set("clients", &field, i.to_string().into_bytes()).await.expect("set should succeed");
            }
        }));
    }
    for handle in handles {
        handle.await.expect("writer task panicked");
    }

    assert_eq!(backend.count("clients").await.expect("count"), (WRITERS * FIELDS_PER_WRITER) as u64);

    // Values are decimal strings 0..50; keep those below 10.
    let low = backend
        .scan("clients", &|value: &[u8]| {
            std::str::from_utf8(value).ok().and_then(|s| s.parse::<u64>().ok()).is_some_and(|n| n < 10)
        })
        .await
        .expect("scan");
    assert_eq!(low.len(), WRITERS * 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scan_during_writes_never_sees_partial_fields() {
    let backend = Arc::new(MemoryBackend::new());

    let writer = {
        let backend = Arc::clone(&backend);
        tokio::spawn(async move {
            for i in 0..500 {
                backend.set("clients", &format!("c{i}"), b"1700000000".to_vec()).await.expect("set");
            }
        })
    };

    for _ in 0..20 {
        let matched = backend.scan("clients", &|value: &[u8]| value == b"1700000000").await.expect("scan");
        let total = backend.count("clients").await.expect("count");
        assert!(matched.len() as u64 <= total);
    }
    writer.await.expect("writer task panicked");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tagged_inserts_are_invalidated_together() {
    let pool = Arc::new(MemoryCachePool::new(None));

    let mut handles = Vec::new();
    for i in 0..32 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            let tags = BTreeSet::from(["user-1".to_owned()]);
            pool.insert(&format!("session-{i}"), b"sealed".to_vec(), tags).await.expect("insert");
        }));
    }
    for handle in handles {
        handle.await.expect("insert task panicked");
    }

    assert_eq!(pool.invalidate_tags(&["user-1"]).await.expect("invalidate"), 32);
    for i in 0..32 {
        assert!(!pool.contains(&format!("session-{i}")).await.expect("contains"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn entries_stay_reachable_by_tag_when_inserts_race_invalidations() {
    let pool = Arc::new(MemoryCachePool::new(None));

    let inserter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            for i in 0..500 {
                let tags = BTreeSet::from(["user-1".to_owned()]);
                pool.insert(&format!("session-{i}"), b"sealed".to_vec(), tags).await.expect("insert");
            }
        })
    };
    let invalidator = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            for _ in 0..200 {
                pool.invalidate_tags(&["user-1"]).await.expect("invalidate");
                tokio::task::yield_now().await;
            }
        })
    };
    inserter.await.expect("insert task panicked");
    invalidator.await.expect("invalidate task panicked");

    // Whatever survived the race must still be reachable through its tag.
    pool.invalidate_tags(&["user-1"]).await.expect("invalidate");
    for i in 0..500 {
        assert!(!pool.contains(&format!("session-{i}")).await.expect("contains"), "session-{i} orphaned");
    }
}
