//! Varco: full-page response cache with punch-out dynamic fragments.
//!
//! Full-page caching normally forces a binary choice: cache the whole page
//! and lose per-request content, or cache nothing and pay for every render.
//! Varco caches pages in full while letting a small set of named fragments
//! ("cart count", "greeting banner") be recomputed fresh on every serve,
//! without a second network round-trip or a full request pipeline.
//!
//! Three pieces cooperate:
//!
//! - the **gateway** ([`PageCache`]) owns the serve/save decision and the
//!   write-avoidance invariant: a response derived from a cached entry is
//!   never re-saved;
//! - the **placeholder codec** finds dynamic-block markers embedded in
//!   cached markup and writes the substitution instructions back into the
//!   outgoing body;
//! - the **fragment renderer** re-enters the host rendering pipeline
//!   in-process, with cache saves suppressed, to recompute only the named
//!   fragments.
//!
//! ## Configuration
//!
//! ```toml
//! [page_cache]
//! enabled = true
//! default_lifetime_secs = 3600
//! max_entries = 512
//! inject_mode = "append"
//! ```

mod config;
mod error;
mod gateway;
mod keys;
mod lock;
mod middleware;
mod placeholder;
mod renderer;
mod scope;
mod store;
pub mod tags;
pub mod telemetry;

pub use config::PageCacheConfig;
pub use error::{RegistryError, RenderError, StoreError};
pub use gateway::{PageCache, SYSTEM_TAG};
pub use keys::{PageKey, hash_query, hash_value};
pub use middleware::{PageCacheState, page_cache_layer};
pub use placeholder::{InjectMode, PlaceholderMarker, extract, inject, marker_for};
pub use renderer::{
    ActionRegistry, FragmentRenderResult, FragmentRenderer, HostPipeline, RenderAction,
    SubRenderContext,
};
pub use scope::{RequestScope, ServeContext, ServeDecision, ServeOverride};
pub use store::{CacheEntry, CacheStore, Lifetime, MemoryStore};
