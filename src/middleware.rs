//! Page cache middleware for axum hosts.
//!
//! Caches GET requests that return `200 OK` HTML and serves cached bodies
//! in place of dispatch. The request's [`RequestScope`] is inserted into
//! the request extensions so application code can observe the serve
//! decision or force a fresh render mid-dispatch.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::{debug, instrument};

use crate::gateway::PageCache;
use crate::keys::PageKey;
use crate::scope::RequestScope;
use crate::tags;
use crate::telemetry;

/// Shared cache state for the middleware.
#[derive(Clone)]
pub struct PageCacheState {
    pub cache: Arc<PageCache>,
}

impl PageCacheState {
    pub fn new(cache: Arc<PageCache>) -> Self {
        telemetry::describe_metrics();
        Self { cache }
    }
}

/// Middleware wiring the cache gateway into request dispatch.
///
/// Serve path: a cache hit (with fragments substituted) short-circuits the
/// inner service. Save path: the fresh body is persisted with the tags the
/// handlers recorded via [`crate::tags::record`], then runs through the
/// same substitution pipeline before transmission.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn page_cache_layer(
    State(state): State<PageCacheState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if !state.cache.config().enabled {
        return next.run(request).await;
    }
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let key = PageKey::new(
        request.uri().path(),
        request.uri().query().unwrap_or(""),
    );
    let scope = Arc::new(RequestScope::new());
    request.extensions_mut().insert(scope.clone());

    if let Some(body) = state.cache.try_serve(&scope, &key).await {
        return html_response(body);
    }

    let (response, collected_tags) = tags::with_collector(next.run(request)).await;

    if response.status() != StatusCode::OK || !is_html(&response) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let lifetime = state.cache.config().default_lifetime();
    state
        .cache
        .save_on_send(&scope, &key, bytes.clone(), &collected_tags, lifetime)
        .await;

    let finalized = state.cache.finalize_fresh(&scope, bytes).await;
    debug!(tag_count = collected_tags.len(), "fresh page dispatched");

    // Injection may have changed the body length.
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(finalized))
}

fn is_html(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"))
}

/// Build a response from a cached body.
fn html_response(body: Bytes) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use axum::response::Html;

    use super::*;

    #[test]
    fn html_detection_requires_the_content_type() {
        let html = Html("<html></html>").into_response();
        assert!(is_html(&html));

        let json = Response::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::empty())
            .expect("response");
        assert!(!is_html(&json));

        let untyped = Response::new(Body::empty());
        assert!(!is_html(&untyped));
    }

    #[test]
    fn cached_body_is_served_as_html() {
        let response = html_response(Bytes::from("<html></html>"));
        assert_eq!(response.status(), StatusCode::OK);
        assert!(is_html(&response));
    }
}
