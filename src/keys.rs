//! Cache key definitions.
//!
//! A page is identified by its request path plus a hash of the query string,
//! so `/posts?page=1` and `/posts?page=2` occupy separate entries.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Canonical identity of a cacheable page.
///
/// A given key maps to at most one live cache entry; writing a key replaces
/// the prior entry atomically from the caller's view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey(String);

impl PageKey {
    /// Build a key from a request path and raw query string.
    pub fn new(path: &str, query: &str) -> Self {
        Self(format!("{path}?{:016x}", hash_query(query)))
    }

    /// Wrap an already-canonical key string.
    ///
    /// Used by hosts that derive page identity outside the HTTP layer.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute a hash for any hashable value.
pub fn hash_value<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Hash a query string for page key generation.
pub fn hash_query(query: &str) -> u64 {
    hash_value(&query)
}
