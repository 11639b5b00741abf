//! Request-scoped cache tag collector.
//!
//! Uses `tokio::task_local!` so page producers can record invalidation tags
//! while the body is being built, without threading a collector through
//! every call. The middleware collects the set at request end and attaches
//! it to the saved cache entry.

use std::cell::RefCell;
use std::collections::HashSet;
use std::future::Future;

tokio::task_local! {
    static TAGS: RefCell<HashSet<String>>;
}

/// Record an invalidation tag for the page being produced.
///
/// Call before (or while) rendering content whose change should drop this
/// page from the cache. If no collector is active, the call is silently
/// ignored.
///
/// # Example
///
/// ```ignore
/// varco::tags::record("catalog");
/// let product = repo.load(sku).await?;
/// ```
pub fn record(tag: impl Into<String>) {
    let tag = tag.into();
    let _ = TAGS.try_with(|tags| {
        tags.borrow_mut().insert(tag);
    });
}

/// Run a future with a tag collector scoped to the current task.
///
/// Returns the future's output and the recorded tags, sorted for
/// determinism.
pub async fn with_collector<F, R>(f: F) -> (R, Vec<String>)
where
    F: Future<Output = R>,
{
    TAGS.scope(RefCell::new(HashSet::new()), async move {
        let result = f.await;
        let mut collected: Vec<String> =
            TAGS.with(|tags| tags.borrow().iter().cloned().collect());
        collected.sort();
        (result, collected)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_without_collector_is_a_no_op() {
        record("catalog");
        let (_, tags) = with_collector(async {}).await;
        assert!(tags.is_empty());
    }

    #[tokio::test]
    async fn collector_captures_recorded_tags() {
        let (_, tags) = with_collector(async {
            record("catalog");
            record("cart");
        })
        .await;
        assert_eq!(tags, vec!["cart".to_string(), "catalog".to_string()]);
    }

    #[tokio::test]
    async fn collector_deduplicates() {
        let (_, tags) = with_collector(async {
            record("catalog");
            record("catalog");
            record("catalog");
        })
        .await;
        assert_eq!(tags.len(), 1);
    }

    #[tokio::test]
    async fn nested_collectors_stay_separate() {
        let (inner_tags, outer_tags) = with_collector(async {
            record("outer");
            let (_, inner) = with_collector(async {
                record("inner");
            })
            .await;
            inner
        })
        .await;

        assert_eq!(inner_tags, vec!["inner".to_string()]);
        assert_eq!(outer_tags, vec!["outer".to_string()]);
    }
}
