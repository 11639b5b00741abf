//! Page cache configuration.
//!
//! Deserialized from the host application's configuration file, e.g.:
//!
//! ```toml
//! [page_cache]
//! enabled = true
//! default_lifetime_secs = 3600
//! max_entries = 512
//! inject_mode = "append"
//! ```

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use crate::placeholder::InjectMode;
use crate::store::Lifetime;

const DEFAULT_LIFETIME_SECS: u64 = 3600;
const DEFAULT_MAX_ENTRIES: usize = 512;

/// Configuration for the page cache subsystem.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PageCacheConfig {
    /// Master switch; when false the gateway serves and saves nothing.
    pub enabled: bool,
    /// Entry lifetime in seconds for saves that do not specify one.
    /// Zero means entries never expire.
    pub default_lifetime_secs: u64,
    /// Maximum entries held by the in-memory store.
    pub max_entries: usize,
    /// How the instruction block is written into an outgoing body.
    pub inject_mode: InjectMode,
}

impl Default for PageCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_lifetime_secs: DEFAULT_LIFETIME_SECS,
            max_entries: DEFAULT_MAX_ENTRIES,
            inject_mode: InjectMode::Append,
        }
    }
}

impl PageCacheConfig {
    /// The configured default lifetime as a store [`Lifetime`].
    pub fn default_lifetime(&self) -> Lifetime {
        if self.default_lifetime_secs == 0 {
            Lifetime::Never
        } else {
            Lifetime::For(Duration::from_secs(self.default_lifetime_secs))
        }
    }

    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}
