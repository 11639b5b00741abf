//! Placeholder codec: dynamic-block markers and instruction injection.
//!
//! A page that contains per-request fragments embeds one marker comment in
//! its body at render time:
//!
//! ```text
//! <!--varco:block {"action":"catalog/product/view","blocks":["cartcount"],"params":{"sku":"42"}}-->
//! ```
//!
//! The marker is stored with the page and survives caching verbatim. On
//! every serve the codec decodes it, the fragment renderer recomputes the
//! named blocks, and [`inject`] writes a single instruction block into the
//! outgoing body:
//!
//! ```text
//! <!--varco:apply--><script data-varco-apply>varcoApplyBlocks({...});</script><!--varco:apply-end-->
//! ```
//!
//! A client-side agent executes `varcoApplyBlocks` after page load to swap
//! the fresh markup into the DOM.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::renderer::FragmentRenderResult;

const MARKER_OPEN: &str = "<!--varco:block ";
const MARKER_CLOSE: &str = "-->";
const APPLY_OPEN: &str = "<!--varco:apply-->";
const APPLY_CLOSE: &str = "<!--varco:apply-end-->";
const CLIENT_FN: &str = "varcoApplyBlocks";
const BODY_CLOSE: &str = "</body>";

/// One decoded dynamic-block marker.
///
/// Ephemeral: lives only for the duration of one serve operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderMarker {
    /// Logical page action that produced the fragment set.
    pub action: String,
    /// Requested fragment names, in document order. Empty when `all_blocks`.
    #[serde(default)]
    pub blocks: Vec<String>,
    /// Request every block the action declares.
    #[serde(default)]
    pub all_blocks: bool,
    /// Opaque parameters forwarded verbatim to the renderer.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl PlaceholderMarker {
    /// Marker requesting a named set of blocks.
    pub fn named(action: impl Into<String>, blocks: impl IntoIterator<Item = String>) -> Self {
        Self {
            action: action.into(),
            blocks: blocks.into_iter().collect(),
            all_blocks: false,
            params: BTreeMap::new(),
        }
    }

    /// Marker requesting every block the action declares.
    pub fn all(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            blocks: Vec::new(),
            all_blocks: true,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Exactly one selector must be present: a named set XOR the all flag.
    fn is_well_formed(&self) -> bool {
        !self.action.is_empty() && (self.all_blocks ^ !self.blocks.is_empty())
    }
}

/// How [`inject`] writes the instruction block into a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectMode {
    /// Strip any prior block, then insert before `</body>` (or append).
    Append,
    /// Overwrite a prior block in place; falls back to append.
    Replace,
}

/// Serialize a marker for embedding in a page body.
///
/// Round-trips exactly through [`extract`].
pub fn marker_for(marker: &PlaceholderMarker) -> String {
    let payload = serde_json::to_string(marker).unwrap_or_default();
    format!("{MARKER_OPEN}{payload}{MARKER_CLOSE}")
}

/// Find and decode the dynamic-block marker in a page body.
///
/// A body with no marker yields `None` after a single forward scan; this is
/// the common case and stays cheap. Malformed markers also yield `None`:
/// the page is served unmodified rather than erroring (fail-open).
pub fn extract(body: &[u8]) -> Option<PlaceholderMarker> {
    let text = std::str::from_utf8(body).ok()?;
    let start = text.find(MARKER_OPEN)?;
    let after = &text[start + MARKER_OPEN.len()..];
    let end = after.find(MARKER_CLOSE)?;
    let payload = after[..end].trim();

    match serde_json::from_str::<PlaceholderMarker>(payload) {
        Ok(marker) if marker.is_well_formed() => Some(marker),
        Ok(_) => {
            debug!(outcome = "rejected", "marker selector malformed; serving page as-is");
            None
        }
        Err(error) => {
            debug!(
                outcome = "rejected",
                error = %error,
                "marker payload undecodable; serving page as-is"
            );
            None
        }
    }
}

/// Write the instruction block for `result` into `body`.
///
/// An empty result returns the body unchanged. Injection is idempotent:
/// any prior instruction block is removed or overwritten, so
/// `inject(inject(b, r1), r2) == inject(b, r2)`.
pub fn inject(body: Bytes, result: &FragmentRenderResult, mode: InjectMode) -> Bytes {
    if result.is_empty() {
        return body;
    }
    let Ok(text) = std::str::from_utf8(&body) else {
        return body;
    };

    let block = instruction_block(result);
    let prior = existing_block_span(text);

    let rewritten = match (mode, prior) {
        (InjectMode::Replace, Some((start, end))) => {
            let mut out = String::with_capacity(text.len() + block.len());
            out.push_str(&text[..start]);
            out.push_str(&block);
            out.push_str(&text[end..]);
            out
        }
        (_, prior) => {
            let mut stripped = text.to_string();
            if let Some((start, end)) = prior {
                stripped.replace_range(start..end, "");
            }
            match stripped.rfind(BODY_CLOSE) {
                Some(at) => {
                    let mut out = String::with_capacity(stripped.len() + block.len());
                    out.push_str(&stripped[..at]);
                    out.push_str(&block);
                    out.push_str(&stripped[at..]);
                    out
                }
                None => {
                    stripped.push_str(&block);
                    stripped
                }
            }
        }
    };

    Bytes::from(rewritten)
}

/// Byte span of an already-injected instruction block, sentinels included.
fn existing_block_span(text: &str) -> Option<(usize, usize)> {
    let start = text.find(APPLY_OPEN)?;
    let close = text[start..].find(APPLY_CLOSE)?;
    Some((start, start + close + APPLY_CLOSE.len()))
}

fn instruction_block(result: &FragmentRenderResult) -> String {
    let payload = serde_json::to_string(result.fragments()).unwrap_or_else(|_| "{}".to_string());
    // `</` inside the payload would terminate the script element early.
    let payload = payload.replace("</", "<\\/");
    format!(
        "{APPLY_OPEN}<script data-varco-apply>{CLIENT_FN}({payload});</script>{APPLY_CLOSE}"
    )
}
