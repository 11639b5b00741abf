//! Cache gateway: the serve/save decision path.
//!
//! Mediates every read and write of the page cache. The one invariant that
//! matters lives here: a request whose response derives from a cached entry
//! must never overwrite that entry on send. Re-saving would at best be
//! redundant and at worst persist an already-substituted body.

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use tracing::{debug, warn};

use crate::config::PageCacheConfig;
use crate::keys::PageKey;
use crate::placeholder;
use crate::renderer::FragmentRenderer;
use crate::scope::{RequestScope, ServeContext, ServeDecision, ServeOverride};
use crate::store::{CacheStore, Lifetime};

/// Tag carried by every entry this subsystem writes; [`PageCache::invalidate_all`]
/// flushes by it.
pub const SYSTEM_TAG: &str = "varco_page";

/// Orchestrates cache lookup, override review, fragment substitution and
/// the save path. Cache failures are never fatal: every degraded path falls
/// back to normal dispatch.
pub struct PageCache {
    config: PageCacheConfig,
    store: Arc<dyn CacheStore>,
    renderer: FragmentRenderer,
    overrides: Vec<Arc<dyn ServeOverride>>,
}

impl PageCache {
    pub fn new(
        config: PageCacheConfig,
        store: Arc<dyn CacheStore>,
        renderer: FragmentRenderer,
    ) -> Self {
        Self {
            config,
            store,
            renderer,
            overrides: Vec::new(),
        }
    }

    /// Register an override hook. Hooks run in registration order.
    pub fn with_override(mut self, hook: Arc<dyn ServeOverride>) -> Self {
        self.overrides.push(hook);
        self
    }

    pub fn config(&self) -> &PageCacheConfig {
        &self.config
    }

    /// Pure read against the store; mutates no decision state.
    ///
    /// A store failure degrades to a miss.
    pub async fn lookup(&self, key: &PageKey) -> Option<Bytes> {
        match self.store.get(key).await {
            Ok(found) => found,
            Err(error) => {
                warn!(key = %key, error = %error, "cache store read failed; treating as miss");
                None
            }
        }
    }

    /// Serve the cached page for `key`, if there is one and no override
    /// vetoes it.
    ///
    /// On a hit the scope is marked `UseCached`, the override hooks get
    /// their one chance to force a fresh render, and the stored body runs
    /// through the extract→render→inject pipeline before being returned.
    /// Returns `None` on miss or veto; normal dispatch proceeds.
    pub async fn try_serve(&self, scope: &RequestScope, key: &PageKey) -> Option<Bytes> {
        if !self.config.enabled {
            return None;
        }

        let Some(body) = self.lookup(key).await else {
            counter!("varco_page_miss_total").increment(1);
            debug!(key = %key, outcome = "miss", "no cached page");
            return None;
        };

        scope.mark_cached();
        for hook in &self.overrides {
            if hook.should_bypass(&ServeContext { key, scope }) {
                scope.force_fresh();
                break;
            }
        }
        if scope.decision() == ServeDecision::UseFresh {
            counter!("varco_page_bypass_total").increment(1);
            debug!(key = %key, outcome = "bypass", "cache hit vetoed by override");
            return None;
        }

        counter!("varco_page_hit_total").increment(1);
        debug!(key = %key, outcome = "hit", "serving cached page");
        Some(self.substitute(scope, body).await)
    }

    /// Persist a freshly produced body, called exactly once at the point
    /// the body is about to be transmitted.
    ///
    /// No-op when the response derives from a cached entry
    /// (write-avoidance), when a fragment sub-render has saves suppressed,
    /// or when the lifetime is [`Lifetime::Bypass`]. The entry is tagged
    /// with the caller's tags plus [`SYSTEM_TAG`].
    pub async fn save_on_send(
        &self,
        scope: &RequestScope,
        key: &PageKey,
        body: Bytes,
        tags: &[String],
        lifetime: Lifetime,
    ) {
        if !self.config.enabled {
            return;
        }
        if scope.decision() == ServeDecision::UseCached {
            counter!("varco_page_write_avoided_total").increment(1);
            debug!(key = %key, "response derives from the cached entry; save skipped");
            return;
        }
        if scope.saves_suppressed() {
            debug!(key = %key, "saves suppressed during fragment render; save skipped");
            return;
        }
        if lifetime == Lifetime::Bypass {
            debug!(key = %key, "bypass lifetime; save skipped");
            return;
        }

        let mut all_tags = tags.to_vec();
        if !all_tags.iter().any(|tag| tag == SYSTEM_TAG) {
            all_tags.push(SYSTEM_TAG.to_string());
        }

        match self.store.put(key, body, &all_tags, lifetime).await {
            Ok(()) => {
                counter!("varco_page_save_total").increment(1);
                debug!(key = %key, tag_count = all_tags.len(), "page cached");
            }
            Err(error) => {
                warn!(key = %key, error = %error, "cache store write failed; page served uncached");
            }
        }
    }

    /// Run the substitution pipeline over a freshly produced body so the
    /// first client receives the instruction block too. The stored entry
    /// keeps the un-injected body; injection idempotency covers the serve
    /// path re-running it.
    pub async fn finalize_fresh(&self, scope: &RequestScope, body: Bytes) -> Bytes {
        if !self.config.enabled {
            return body;
        }
        self.substitute(scope, body).await
    }

    async fn substitute(&self, scope: &RequestScope, body: Bytes) -> Bytes {
        let Some(marker) = placeholder::extract(&body) else {
            return body;
        };
        let result = self.renderer.render(scope, &marker).await;
        placeholder::inject(body, &result, self.config.inject_mode)
    }

    /// Bulk-remove every entry this subsystem wrote.
    pub async fn invalidate_all(&self) {
        match self.store.invalidate_tag(SYSTEM_TAG).await {
            Ok(removed) => debug!(removed, "page cache flushed"),
            Err(error) => warn!(error = %error, "page cache flush failed"),
        }
    }

    /// Intentionally a no-op: tag-precise invalidation is the store's own
    /// job. Its tag index already drops entries when any of their tags is
    /// invalidated upstream, and duplicating that bookkeeping here would
    /// drift.
    pub fn invalidate_tags(&self, _tags: &[String]) {}
}
