//! Metric descriptions for the page cache.
//!
//! The host application installs its own recorder and tracing subscriber;
//! this module only registers descriptions for the counters the gateway
//! emits.

use std::sync::Once;

use metrics::{Unit, describe_counter};

static DESCRIPTIONS: Once = Once::new();

/// Register metric descriptions. Safe to call more than once.
pub fn describe_metrics() {
    DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "varco_page_hit_total",
            Unit::Count,
            "Pages served from the cache."
        );
        describe_counter!(
            "varco_page_miss_total",
            Unit::Count,
            "Cache lookups that found no valid entry."
        );
        describe_counter!(
            "varco_page_bypass_total",
            Unit::Count,
            "Cache hits vetoed by an override hook."
        );
        describe_counter!(
            "varco_page_save_total",
            Unit::Count,
            "Pages persisted to the cache."
        );
        describe_counter!(
            "varco_page_write_avoided_total",
            Unit::Count,
            "Saves skipped because the response derived from a cached entry."
        );
    });
}
