//! Fragment renderer: the in-process sub-render pipeline.
//!
//! Recomputes exactly the fragments a decoded marker requests, isolated
//! from both the page-caching mechanism (saves are suppressed for the
//! duration of the call) and from any per-request state the surrounding
//! dispatch may have left behind. The sub-render is awaited inline on the
//! caller's task: no spawn, no I/O, no second request.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{RegistryError, RenderError};
use crate::placeholder::PlaceholderMarker;
use crate::scope::RequestScope;

/// Context for one fragment sub-render call.
///
/// Constructed fresh per call so nothing carries over from the outer
/// request or any prior sub-render.
#[derive(Debug, Clone)]
pub struct SubRenderContext {
    action: String,
    params: BTreeMap<String, String>,
}

impl SubRenderContext {
    fn for_marker(marker: &PlaceholderMarker) -> Self {
        Self {
            action: marker.action.clone(),
            params: marker.params.clone(),
        }
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// A page action that can re-render its dynamic blocks on demand.
///
/// One implementation per logical page action, registered by name in the
/// [`ActionRegistry`] at startup.
#[async_trait]
pub trait RenderAction: Send + Sync {
    /// The block names this action can produce. Fixed at registration;
    /// consulted when a marker requests all blocks.
    fn blocks(&self) -> &[&'static str];

    /// Render one block. A failure omits that block from the result
    /// without aborting the rest of the sub-render.
    async fn render_block(
        &self,
        ctx: &SubRenderContext,
        block: &str,
    ) -> Result<String, RenderError>;
}

/// The host application's shared rendering machinery, as seen by the
/// fragment renderer.
#[async_trait]
pub trait HostPipeline: Send + Sync {
    /// Bring shared rendering state up if the surrounding request never
    /// did, which is the common case when serving straight from cache.
    async fn ensure_initialized(&self, ctx: &SubRenderContext) -> Result<(), RenderError>;

    /// Clear the per-request subset of shared rendering state that would
    /// otherwise leak from a mid-dispatch outer request into this
    /// sub-render.
    fn reset_request_state(&self);
}

/// Startup-validated table mapping action names to render functions.
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn RenderAction>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action under a name. Duplicate names are a startup
    /// error, not a silent shadow.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        action: Arc<dyn RenderAction>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.actions.contains_key(&name) {
            return Err(RegistryError::DuplicateAction { action: name });
        }
        self.actions.insert(name, action);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn get(&self, name: &str) -> Option<&Arc<dyn RenderAction>> {
        self.actions.get(name)
    }
}

/// Rendered fragment output, keyed by block name.
///
/// Produced by the renderer, consumed once by the codec's injection step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentRenderResult {
    fragments: BTreeMap<String, String>,
}

impl FragmentRenderResult {
    pub fn insert(&mut self, block: impl Into<String>, markup: impl Into<String>) {
        self.fragments.insert(block.into(), markup.into());
    }

    pub fn get(&self, block: &str) -> Option<&str> {
        self.fragments.get(block).map(String::as_str)
    }

    pub fn fragments(&self) -> &BTreeMap<String, String> {
        &self.fragments
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Recomputes requested fragments by re-entering the host pipeline.
pub struct FragmentRenderer {
    pipeline: Arc<dyn HostPipeline>,
    actions: ActionRegistry,
}

impl FragmentRenderer {
    pub fn new(pipeline: Arc<dyn HostPipeline>, actions: ActionRegistry) -> Self {
        Self { pipeline, actions }
    }

    /// Render the fragments a marker requests.
    ///
    /// Never errors the caller: an unknown action or a failed pipeline
    /// yields an empty result, and a failed block is omitted while the
    /// rest still render. Cache saves are suppressed for the duration of
    /// the call and the prior state is restored unconditionally.
    pub async fn render(
        &self,
        scope: &RequestScope,
        marker: &PlaceholderMarker,
    ) -> FragmentRenderResult {
        let _suppress = scope.suppress_saves();

        let Some(action) = self.actions.get(&marker.action) else {
            warn!(
                action = %marker.action,
                error = %RenderError::unknown_action(&marker.action),
                "serving page without fresh fragments"
            );
            return FragmentRenderResult::default();
        };

        let ctx = SubRenderContext::for_marker(marker);

        if let Err(error) = self.pipeline.ensure_initialized(&ctx).await {
            warn!(
                action = %marker.action,
                error = %error,
                "host pipeline unavailable; serving page without fresh fragments"
            );
            return FragmentRenderResult::default();
        }
        self.pipeline.reset_request_state();

        let declared = action.blocks();
        let requested: Vec<&str> = if marker.all_blocks {
            declared.to_vec()
        } else {
            marker.blocks.iter().map(String::as_str).collect()
        };

        let mut result = FragmentRenderResult::default();
        for block in requested {
            if !declared.contains(&block) {
                warn!(action = %marker.action, block, "block not declared by action; omitted");
                continue;
            }
            match action.render_block(&ctx, block).await {
                Ok(markup) => result.insert(block, markup),
                Err(error) => {
                    warn!(action = %marker.action, block, error = %error, "fragment omitted");
                }
            }
        }

        debug!(
            action = %marker.action,
            rendered = result.len(),
            "fragment sub-render complete"
        );
        result
    }
}
