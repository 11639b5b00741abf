//! Per-request cache state.
//!
//! Each page request owns one [`RequestScope`]: the serve decision tri-state
//! plus the save-suppression flag used while a fragment sub-render is in
//! flight. The scope is an explicit object handed to the gateway and
//! renderer rather than process-wide state, so nothing leaks between
//! requests.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::keys::PageKey;

const DECISION_UNSET: u8 = 0;
const DECISION_USE_CACHED: u8 = 1;
const DECISION_USE_FRESH: u8 = 2;

/// Whether the cached entry will be served for the current request.
///
/// Starts `Unset`; a cache hit moves it to `UseCached`; an override hook may
/// force `UseFresh` before the body is handed back. `UseFresh` is sticky:
/// once an override has vetoed the cached entry, a later hit cannot undo it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeDecision {
    Unset,
    UseCached,
    UseFresh,
}

/// Cache state scoped to a single page request.
///
/// Shared across await points within one request task; never across
/// requests. Atomics keep the scope `Sync` without a lock.
#[derive(Debug, Default)]
pub struct RequestScope {
    decision: AtomicU8,
    saves_suppressed: AtomicBool,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decision(&self) -> ServeDecision {
        match self.decision.load(Ordering::SeqCst) {
            DECISION_USE_CACHED => ServeDecision::UseCached,
            DECISION_USE_FRESH => ServeDecision::UseFresh,
            _ => ServeDecision::Unset,
        }
    }

    /// Record a cache hit. Does not demote an override's `UseFresh`.
    pub(crate) fn mark_cached(&self) {
        let _ = self.decision.compare_exchange(
            DECISION_UNSET,
            DECISION_USE_CACHED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Veto the cached entry for this request and force a fresh render.
    pub fn force_fresh(&self) {
        self.decision.store(DECISION_USE_FRESH, Ordering::SeqCst);
    }

    /// True while a fragment sub-render has cache writes suppressed.
    pub fn saves_suppressed(&self) -> bool {
        self.saves_suppressed.load(Ordering::SeqCst)
    }

    /// Suppress cache writes until the returned guard drops.
    ///
    /// The prior state is restored unconditionally on drop, including on
    /// early return and unwind.
    pub(crate) fn suppress_saves(&self) -> SuppressSavesGuard<'_> {
        let prior = self.saves_suppressed.swap(true, Ordering::SeqCst);
        SuppressSavesGuard { scope: self, prior }
    }
}

pub(crate) struct SuppressSavesGuard<'a> {
    scope: &'a RequestScope,
    prior: bool,
}

impl Drop for SuppressSavesGuard<'_> {
    fn drop(&mut self) {
        self.scope
            .saves_suppressed
            .store(self.prior, Ordering::SeqCst);
    }
}

/// What an override hook gets to look at before a cache hit is honored.
pub struct ServeContext<'a> {
    pub key: &'a PageKey,
    pub scope: &'a RequestScope,
}

/// External veto over serving a cached response.
///
/// Hooks run synchronously, in registration order, after a hit marks the
/// scope `UseCached` and before the body is handed back. Returning `true`
/// forces a fresh render; the first veto wins and later hooks are not
/// consulted.
pub trait ServeOverride: Send + Sync {
    fn should_bypass(&self, ctx: &ServeContext<'_>) -> bool;
}

impl<F> ServeOverride for F
where
    F: Fn(&ServeContext<'_>) -> bool + Send + Sync,
{
    fn should_bypass(&self, ctx: &ServeContext<'_>) -> bool {
        self(ctx)
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    #[test]
    fn decision_starts_unset() {
        let scope = RequestScope::new();
        assert_eq!(scope.decision(), ServeDecision::Unset);
    }

    #[test]
    fn hit_marks_use_cached() {
        let scope = RequestScope::new();
        scope.mark_cached();
        assert_eq!(scope.decision(), ServeDecision::UseCached);
    }

    #[test]
    fn force_fresh_is_sticky() {
        let scope = RequestScope::new();
        scope.force_fresh();
        scope.mark_cached();
        assert_eq!(scope.decision(), ServeDecision::UseFresh);
    }

    #[test]
    fn override_after_hit_wins() {
        let scope = RequestScope::new();
        scope.mark_cached();
        scope.force_fresh();
        assert_eq!(scope.decision(), ServeDecision::UseFresh);
    }

    #[test]
    fn suppression_guard_restores_on_drop() {
        let scope = RequestScope::new();
        assert!(!scope.saves_suppressed());
        {
            let _guard = scope.suppress_saves();
            assert!(scope.saves_suppressed());
        }
        assert!(!scope.saves_suppressed());
    }

    #[test]
    fn nested_suppression_restores_outer_state() {
        let scope = RequestScope::new();
        let outer = scope.suppress_saves();
        {
            let _inner = scope.suppress_saves();
            assert!(scope.saves_suppressed());
        }
        // Inner guard restores the state the outer guard established.
        assert!(scope.saves_suppressed());
        drop(outer);
        assert!(!scope.saves_suppressed());
    }

    #[test]
    fn suppression_guard_restores_on_unwind() {
        let scope = RequestScope::new();
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = scope.suppress_saves();
            panic!("sub-render failed");
        }));
        assert!(!scope.saves_suppressed());
    }

    #[test]
    fn closure_implements_serve_override() {
        let scope = RequestScope::new();
        let key = PageKey::from_raw("/checkout");
        let hook = |ctx: &ServeContext<'_>| ctx.key.as_str().contains("checkout");
        assert!(hook.should_bypass(&ServeContext {
            key: &key,
            scope: &scope
        }));
    }
}
