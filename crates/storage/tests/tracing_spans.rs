//! Integration test verifying that `#[instrument]` annotations produce
//! the expected spans on `MemoryBackend` and `MemoryCachePool` operations.

#![allow(clippy::expect_used)]

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};

use tessera_storage::{CachePool, MemoryBackend, MemoryCachePool, StorageBackend};
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer: records span names as they are created
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

fn collect() -> (Arc<Mutex<Vec<String>>>, tracing::subscriber::DefaultGuard) {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);
    let subscriber = tracing_subscriber::registry().with(collector);
    (spans, tracing::subscriber::set_default(subscriber))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn memory_backend_field_ops_create_spans() {
    let (spans, _guard) = collect();

    let backend = MemoryBackend::new();
    backend.set("clients", "a", b"1".to_vec()).await.expect("set should succeed");
    let _ = backend.get("clients", "a").await;
    let _ = backend.exists("clients", "a").await;
    backend.delete("clients", &["a"]).await.expect("delete should succeed");

    let recorded = spans.lock().expect("lock poisoned");
    for name in ["set", "get", "exists", "delete"] {
        assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
    }
}

#[tokio::test]
async fn memory_backend_scan_creates_span() {
    let (spans, _guard) = collect();

    let backend = MemoryBackend::new();
    let _ = backend.scan("clients", &|_: &[u8]| true).await;
    let _ = backend.count("clients").await;
    let _ = backend.first_field("clients").await;

    let recorded = spans.lock().expect("lock poisoned");
    for name in ["scan", "count", "first_field"] {
        assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
    }
}

#[tokio::test]
async fn cache_pool_ops_create_spans() {
    let (spans, _guard) = collect();

    let pool = MemoryCachePool::new(None);
    pool.insert("k", b"v".to_vec(), BTreeSet::from(["user-1".to_owned()])).await.expect("insert should succeed");
    let _ = pool.get("k").await;
    let _ = pool.invalidate_tags(&["user-1"]).await;
    let _ = pool.delete("k").await;

    let recorded = spans.lock().expect("lock poisoned");
    for name in ["insert", "get", "invalidate_tags", "delete"] {
        assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
    }
}

#[tokio::test]
async fn health_check_is_not_instrumented() {
    let (spans, _guard) = collect();

    let backend = MemoryBackend::new();
    backend.health_check().await.expect("health check should succeed");

    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.is_empty(), "expected no spans, got: {recorded:?}");
}
