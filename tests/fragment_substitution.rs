//! End-to-end serve/save behavior of the cache gateway.
//!
//! Exercises the public API the way a host application would: save a page
//! carrying a dynamic-block marker, serve it back, and verify the marked
//! fragments are recomputed fresh while the rest of the page stays cached.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use varco::{
    ActionRegistry, FragmentRenderer, HostPipeline, Lifetime, MemoryStore, PageCache,
    PageCacheConfig, PageKey, PlaceholderMarker, RenderAction, RenderError, RequestScope,
    SubRenderContext, marker_for,
};

struct IdlePipeline;

#[async_trait]
impl HostPipeline for IdlePipeline {
    async fn ensure_initialized(&self, _ctx: &SubRenderContext) -> Result<(), RenderError> {
        Ok(())
    }

    fn reset_request_state(&self) {}
}

/// Renders a strictly increasing cart count so each serve is observable.
struct CartCountAction {
    serves: AtomicUsize,
}

#[async_trait]
impl RenderAction for CartCountAction {
    fn blocks(&self) -> &[&'static str] {
        &["cartcount"]
    }

    async fn render_block(
        &self,
        _ctx: &SubRenderContext,
        _block: &str,
    ) -> Result<String, RenderError> {
        let serve = self.serves.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("<span>{serve}</span>"))
    }
}

fn build_cache(store: Arc<MemoryStore>) -> PageCache {
    let mut actions = ActionRegistry::new();
    actions
        .register(
            "catalog/product/view",
            Arc::new(CartCountAction {
                serves: AtomicUsize::new(0),
            }),
        )
        .expect("register action");
    PageCache::new(
        PageCacheConfig::default(),
        store,
        FragmentRenderer::new(Arc::new(IdlePipeline), actions),
    )
}

fn page_with_marker() -> Bytes {
    let marker = PlaceholderMarker::named("catalog/product/view", vec!["cartcount".to_string()]);
    Bytes::from(format!(
        "<html><body><p>Widget, $10</p>{}</body></html>",
        marker_for(&marker)
    ))
}

#[tokio::test]
async fn cached_page_gets_fresh_fragments_on_every_serve() {
    let store = Arc::new(MemoryStore::new(&PageCacheConfig::default()));
    let cache = build_cache(store.clone());
    let key = PageKey::from_raw("/product/widget");

    cache
        .save_on_send(
            &RequestScope::new(),
            &key,
            page_with_marker(),
            &["catalog".to_string()],
            Lifetime::from_secs(3600),
        )
        .await;

    let first = cache
        .try_serve(&RequestScope::new(), &key)
        .await
        .expect("first serve");
    let second = cache
        .try_serve(&RequestScope::new(), &key)
        .await
        .expect("second serve");

    let first = std::str::from_utf8(&first).expect("utf8");
    let second = std::str::from_utf8(&second).expect("utf8");

    // The static page content is the cached copy both times.
    assert!(first.contains("Widget, $10"));
    assert!(second.contains("Widget, $10"));

    // The fragment output moved between serves: it was recomputed, not
    // replayed from the save-time value.
    assert!(first.contains("\"cartcount\":\"<span>1<\\/span>\""));
    assert!(second.contains("\"cartcount\":\"<span>2<\\/span>\""));
}

#[tokio::test]
async fn save_path_also_delivers_the_instruction_block() {
    let store = Arc::new(MemoryStore::new(&PageCacheConfig::default()));
    let cache = build_cache(store.clone());
    let key = PageKey::from_raw("/product/widget");
    let scope = RequestScope::new();
    let body = page_with_marker();

    cache
        .save_on_send(&scope, &key, body.clone(), &[], Lifetime::from_secs(3600))
        .await;
    let sent = cache.finalize_fresh(&scope, body).await;

    let sent = std::str::from_utf8(&sent).expect("utf8");
    assert!(sent.contains("varcoApplyBlocks"));

    // The stored copy keeps the bare marker, not the instruction block.
    let stored = cache.lookup(&key).await.expect("stored entry");
    let stored = std::str::from_utf8(&stored).expect("utf8");
    assert!(!stored.contains("varcoApplyBlocks"));
    assert!(varco::extract(stored.as_bytes()).is_some());
}

#[tokio::test]
async fn served_body_is_never_saved_back() {
    let store = Arc::new(MemoryStore::new(&PageCacheConfig::default()));
    let cache = build_cache(store.clone());
    let key = PageKey::from_raw("/product/widget");

    cache
        .save_on_send(
            &RequestScope::new(),
            &key,
            page_with_marker(),
            &[],
            Lifetime::from_secs(3600),
        )
        .await;
    let stored_before = cache.lookup(&key).await.expect("entry");

    let scope = RequestScope::new();
    let served = cache.try_serve(&scope, &key).await.expect("hit");

    // The substituted body reaches send; the write-avoidance invariant
    // keeps it (and its injected instructions) out of the store.
    cache
        .save_on_send(&scope, &key, served, &[], Lifetime::from_secs(3600))
        .await;
    let stored_after = cache.lookup(&key).await.expect("entry");
    assert_eq!(stored_before, stored_after);
}

#[tokio::test]
async fn flush_removes_system_tagged_entries_only() {
    let store = Arc::new(MemoryStore::new(&PageCacheConfig::default()));
    let cache = build_cache(store.clone());
    let page_key = PageKey::from_raw("/product/widget");
    let foreign_key = PageKey::from_raw("/not-a-page");

    cache
        .save_on_send(
            &RequestScope::new(),
            &page_key,
            page_with_marker(),
            &["catalog".to_string()],
            Lifetime::Never,
        )
        .await;

    // An entry another subsystem wrote to the same store, without the
    // system tag.
    use varco::CacheStore;
    store
        .put(
            &foreign_key,
            Bytes::from("foreign"),
            &["other".to_string()],
            Lifetime::Never,
        )
        .await
        .expect("foreign put");

    cache.invalidate_all().await;

    assert!(cache.lookup(&page_key).await.is_none());
    assert!(store.get(&foreign_key).await.expect("get").is_some());
}

#[tokio::test]
async fn page_without_marker_serves_verbatim() {
    let store = Arc::new(MemoryStore::new(&PageCacheConfig::default()));
    let cache = build_cache(store.clone());
    let key = PageKey::from_raw("/static");
    let body = Bytes::from("<html><body>nothing dynamic</body></html>");

    cache
        .save_on_send(&RequestScope::new(), &key, body.clone(), &[], Lifetime::Never)
        .await;

    let served = cache
        .try_serve(&RequestScope::new(), &key)
        .await
        .expect("hit");
    assert_eq!(served, body);
}

#[tokio::test]
async fn corrupted_marker_fails_open() {
    let store = Arc::new(MemoryStore::new(&PageCacheConfig::default()));
    let cache = build_cache(store.clone());
    let key = PageKey::from_raw("/corrupted");
    let body = Bytes::from("<html><body><!--varco:block {broken--></body></html>");

    cache
        .save_on_send(&RequestScope::new(), &key, body.clone(), &[], Lifetime::Never)
        .await;

    let served = cache
        .try_serve(&RequestScope::new(), &key)
        .await
        .expect("hit");
    assert_eq!(served, body);
}
